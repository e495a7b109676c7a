//! Section preview scheduling.
//!
//! Requested sections are rendered in chunks of at most
//! `max_concurrent` jobs. Jobs inside a chunk run interleaved on the calling
//! task and are joined all-settled, so one failure or timeout never stops its
//! neighbours. Chunks run strictly one after another with a short pause in
//! between to leave frames for the main view.
//!
//! Per section: `Pending -> Rendering -> Captured | Failed | TimedOut`.
//! Captured thumbnails are kept for the session. A section is never queued
//! twice; failed and timed out sections only run again through
//! [`PreviewScheduler::retry`].
use crate::error::PreviewResult;
use crate::scene::{build_scene, PreviewPalette};
use crate::target::{PreviewBackend, PreviewImage, RenderTarget, ScopedRenderTarget};
use constants::host::DEFAULT_SLICE_KEY;
use constants::preview::{
    CAPTURE_SETTLE_MS, CHUNK_DELAY_MS, MAX_CONCURRENT_PREVIEWS, PREVIEW_SIZE, PREVIEW_TIMEOUT_MS,
};
use futures::future::join_all;
use parking_lot::Mutex;
use point_cloud_attributes::{AttributeSnapshot, CategoryCode, GlobalConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Rendering,
    Captured,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, JobStatus::Captured | JobStatus::Failed | JobStatus::TimedOut)
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewConfig {
    /// Thumbnail edge length in pixels.
    pub size: u32,
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub chunk_delay: Duration,
    /// Wait between frame completion and capture.
    pub settle_delay: Duration,
    pub slice_key: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            size: PREVIEW_SIZE,
            max_concurrent: MAX_CONCURRENT_PREVIEWS,
            timeout: Duration::from_millis(PREVIEW_TIMEOUT_MS),
            chunk_delay: Duration::from_millis(CHUNK_DELAY_MS),
            settle_delay: Duration::from_millis(CAPTURE_SETTLE_MS),
            slice_key: DEFAULT_SLICE_KEY.to_string(),
        }
    }
}

impl From<&GlobalConfig> for PreviewConfig {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            size: config.preview_size,
            max_concurrent: config.max_concurrent_previews,
            timeout: Duration::from_millis(config.preview_timeout_ms),
            chunk_delay: Duration::from_millis(config.chunk_delay_ms),
            settle_delay: Duration::from_millis(config.capture_settle_ms),
            slice_key: config.slice_key.clone(),
        }
    }
}

/// Published as each job starts and settles.
#[derive(Debug, Clone)]
pub enum PreviewEvent {
    Started { section: CategoryCode },
    Captured { section: CategoryCode, image: Arc<PreviewImage> },
    Failed { section: CategoryCode, reason: String },
    TimedOut { section: CategoryCode },
}

pub type PreviewObserver = Box<dyn Fn(&PreviewEvent) + Send + Sync>;

/// Outcome counts of one [`PreviewScheduler::submit`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    pub scheduled: usize,
    /// Already known to the scheduler, or repeated in the request.
    pub skipped: usize,
    pub captured: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Settled after a reset, or never started because of one.
    pub discarded: usize,
}

#[derive(Debug, Default)]
struct Book {
    epoch: u64,
    status: BTreeMap<CategoryCode, JobStatus>,
    cache: BTreeMap<CategoryCode, Arc<PreviewImage>>,
    failures: BTreeMap<CategoryCode, String>,
    revision: u64,
}

/// Forgets the unsettled jobs of a `submit` future dropped before it
/// finished, so a later submission picks those sections up again.
struct Unsettled<'a> {
    book: &'a Mutex<Book>,
    epoch: u64,
    sections: Vec<CategoryCode>,
}

impl Drop for Unsettled<'_> {
    fn drop(&mut self) {
        let mut book = self.book.lock();
        if book.epoch != self.epoch {
            return;
        }
        let mut cleared = 0;
        for section in &self.sections {
            if book.status.get(section).is_some_and(|s| !s.is_settled()) {
                book.status.remove(section);
                cleared += 1;
            }
        }
        if cleared > 0 {
            book.revision += 1;
            log::debug!("Abandoned submission left {} previews unsettled", cleared);
        }
    }
}

pub struct PreviewScheduler<B: PreviewBackend> {
    backend: B,
    config: PreviewConfig,
    book: Mutex<Book>,
    observer: Option<PreviewObserver>,
}

impl<B: PreviewBackend> PreviewScheduler<B> {
    pub fn new(backend: B, config: PreviewConfig) -> Self {
        Self {
            backend,
            config,
            book: Mutex::new(Book::default()),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl Fn(&PreviewEvent) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn status(&self, section: CategoryCode) -> Option<JobStatus> {
        self.book.lock().status.get(&section).copied()
    }

    pub fn preview(&self, section: CategoryCode) -> Option<Arc<PreviewImage>> {
        self.book.lock().cache.get(&section).cloned()
    }

    /// Every captured thumbnail so far.
    pub fn previews(&self) -> BTreeMap<CategoryCode, Arc<PreviewImage>> {
        self.book.lock().cache.clone()
    }

    pub fn failure(&self, section: CategoryCode) -> Option<String> {
        self.book.lock().failures.get(&section).cloned()
    }

    /// Bumped whenever a job settles or the scheduler is reset.
    pub fn revision(&self) -> u64 {
        self.book.lock().revision
    }

    /// Render every section in `sections` not already pending, rendering,
    /// captured or failed. Returns once all scheduled jobs have settled.
    pub async fn submit(
        &self,
        snapshot: Arc<AttributeSnapshot>,
        palette: &PreviewPalette,
        sections: &[CategoryCode],
    ) -> SubmitSummary {
        let (epoch, eligible) = {
            let mut book = self.book.lock();
            let mut eligible = Vec::new();
            for &section in sections {
                if book.status.contains_key(&section) {
                    continue;
                }
                book.status.insert(section, JobStatus::Pending);
                eligible.push(section);
            }
            (book.epoch, eligible)
        };

        let mut summary = SubmitSummary {
            scheduled: eligible.len(),
            skipped: sections.len() - eligible.len(),
            ..SubmitSummary::default()
        };
        if eligible.is_empty() {
            log::debug!("No new sections to preview");
            return summary;
        }

        let _abandoned = Unsettled {
            book: &self.book,
            epoch,
            sections: eligible.clone(),
        };
        let limit = self.config.max_concurrent.max(1);
        log::info!(
            "Rendering {} section previews, {} at a time",
            eligible.len(),
            limit
        );

        for (chunk_idx, chunk) in eligible.chunks(limit).enumerate() {
            if chunk_idx > 0 {
                sleep(self.config.chunk_delay).await;
            }
            if self.book.lock().epoch != epoch {
                let remaining = eligible.len() - chunk_idx * limit;
                log::debug!("Dropping {} queued previews after reset", remaining);
                summary.discarded += remaining;
                break;
            }

            let jobs = chunk
                .iter()
                .map(|&section| self.run_job(&snapshot, palette, section, epoch));
            for outcome in join_all(jobs).await {
                match outcome {
                    Some(JobStatus::Captured) => summary.captured += 1,
                    Some(JobStatus::TimedOut) => summary.timed_out += 1,
                    Some(_) => summary.failed += 1,
                    None => summary.discarded += 1,
                }
            }
        }

        log::info!(
            "Section previews done: {} captured, {} failed, {} timed out",
            summary.captured,
            summary.failed,
            summary.timed_out
        );
        summary
    }

    /// Run failed or timed out `sections` again. Other sections are skipped.
    pub async fn retry(
        &self,
        snapshot: Arc<AttributeSnapshot>,
        palette: &PreviewPalette,
        sections: &[CategoryCode],
    ) -> SubmitSummary {
        {
            let mut book = self.book.lock();
            for section in sections {
                if book.status.get(section).is_some_and(|s| s.is_retryable()) {
                    book.status.remove(section);
                    book.failures.remove(section);
                }
            }
        }
        self.submit(snapshot, palette, sections).await
    }

    /// Forget every job and thumbnail. Jobs still in flight finish but their
    /// results are dropped.
    pub fn reset(&self) {
        let mut book = self.book.lock();
        book.epoch += 1;
        book.status.clear();
        book.cache.clear();
        book.failures.clear();
        book.revision += 1;
        log::info!("Section previews reset");
    }

    async fn run_job(
        &self,
        snapshot: &AttributeSnapshot,
        palette: &PreviewPalette,
        section: CategoryCode,
        epoch: u64,
    ) -> Option<JobStatus> {
        {
            let mut book = self.book.lock();
            if book.epoch != epoch {
                return None;
            }
            book.status.insert(section, JobStatus::Rendering);
        }
        self.emit(&PreviewEvent::Started { section });

        let rendered = timeout(self.config.timeout, self.render_section(snapshot, palette, section)).await;
        let (status, event) = match rendered {
            Ok(Ok(image)) => {
                log::debug!("Captured preview for section {}", section);
                let image = Arc::new(image);
                (JobStatus::Captured, PreviewEvent::Captured { section, image })
            }
            Ok(Err(err)) => {
                log::warn!("Preview for section {} failed: {}", section, err);
                let reason = err.to_string();
                (JobStatus::Failed, PreviewEvent::Failed { section, reason })
            }
            Err(_) => {
                log::warn!(
                    "Preview for section {} timed out after {:?}",
                    section,
                    self.config.timeout
                );
                (JobStatus::TimedOut, PreviewEvent::TimedOut { section })
            }
        };

        {
            let mut book = self.book.lock();
            if book.epoch != epoch {
                log::debug!("Discarding preview for section {} after reset", section);
                return None;
            }
            book.status.insert(section, status);
            match &event {
                PreviewEvent::Captured { image, .. } => {
                    book.cache.insert(section, image.clone());
                }
                PreviewEvent::Failed { reason, .. } => {
                    book.failures.insert(section, reason.clone());
                }
                PreviewEvent::TimedOut { .. } => {
                    book.failures.insert(section, "timed out".to_string());
                }
                PreviewEvent::Started { .. } => {}
            }
            book.revision += 1;
        }
        self.emit(&event);
        Some(status)
    }

    /// One render pass into a fresh target. The target is released when this
    /// future completes or is dropped.
    async fn render_section(
        &self,
        snapshot: &AttributeSnapshot,
        palette: &PreviewPalette,
        section: CategoryCode,
    ) -> PreviewResult<PreviewImage> {
        let scene = build_scene(snapshot, palette, &self.config.slice_key, section, self.config.size)?;
        let mut target = ScopedRenderTarget::new(self.backend.create_target(self.config.size)?);
        target.render(&scene).await?;
        sleep(self.config.settle_delay).await;
        target.capture()
    }

    fn emit(&self, event: &PreviewEvent) {
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PreviewError;
    use crate::scene::PreviewScene;
    use point_cloud_attributes::annotation::{AnnotationDimension, CategoryCodes};
    use point_cloud_attributes::{AttributeRepository, PointSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[derive(Debug, Clone, Copy)]
    enum Script {
        Frame(Duration),
        Hang,
        Fail,
    }

    #[derive(Debug, Default)]
    struct Tally {
        active: AtomicUsize,
        peak: AtomicUsize,
        live: AtomicUsize,
        created: AtomicUsize,
        starts: Mutex<Vec<(CategoryCode, Instant)>>,
    }

    impl Tally {
        fn renders_of(&self, section: CategoryCode) -> usize {
            self.starts.lock().iter().filter(|(s, _)| *s == section).count()
        }

        fn started_at(&self, section: CategoryCode) -> Instant {
            self.starts
                .lock()
                .iter()
                .find(|(s, _)| *s == section)
                .map(|(_, at)| *at)
                .unwrap()
        }
    }

    struct ActiveGuard(Arc<Tally>);

    impl Drop for ActiveGuard {
        fn drop(&mut self) {
            self.0.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct ScriptedBackend {
        tally: Arc<Tally>,
        scripts: BTreeMap<CategoryCode, Script>,
    }

    struct ScriptedTarget {
        tally: Arc<Tally>,
        scripts: BTreeMap<CategoryCode, Script>,
        section: Option<CategoryCode>,
    }

    impl PreviewBackend for ScriptedBackend {
        type Target = ScriptedTarget;

        fn create_target(&self, _size: u32) -> PreviewResult<ScriptedTarget> {
            self.tally.created.fetch_add(1, Ordering::SeqCst);
            self.tally.live.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedTarget {
                tally: self.tally.clone(),
                scripts: self.scripts.clone(),
                section: None,
            })
        }
    }

    impl RenderTarget for ScriptedTarget {
        async fn render(&mut self, scene: &PreviewScene) -> PreviewResult<()> {
            self.tally.starts.lock().push((scene.section, Instant::now()));
            let active = self.tally.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.tally.peak.fetch_max(active, Ordering::SeqCst);
            let _guard = ActiveGuard(self.tally.clone());

            match self
                .scripts
                .get(&scene.section)
                .copied()
                .unwrap_or(Script::Frame(Duration::from_millis(50)))
            {
                Script::Frame(frame) => sleep(frame).await,
                Script::Hang => std::future::pending::<()>().await,
                Script::Fail => return Err(PreviewError::Render("scripted failure".into())),
            }
            self.section = Some(scene.section);
            Ok(())
        }

        fn capture(&mut self) -> PreviewResult<PreviewImage> {
            let section = self.section.ok_or(PreviewError::NotRendered)?;
            Ok(PreviewImage {
                section,
                width: 1,
                height: 1,
                png: vec![section as u8],
            })
        }

        fn release(&mut self) {
            self.tally.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// `n` sections with ids `1..=n`, one point each.
    fn sections(n: u32) -> Arc<AttributeSnapshot> {
        let repo = AttributeRepository::new();
        repo.commit(|draft| {
            let positions = (0..n).flat_map(|i| [i as f64, 0.0, 0.0]).collect();
            draft.replace_points(PointSet::new(positions, None));
            Arc::make_mut(&mut draft.annotations).insert(AnnotationDimension::new(
                "section",
                vec![],
                CategoryCodes::U32((1..=n).collect()),
            ));
        });
        repo.snapshot()
    }

    fn scheduler(scripts: &[(CategoryCode, Script)]) -> PreviewScheduler<ScriptedBackend> {
        let backend = ScriptedBackend {
            tally: Arc::default(),
            scripts: scripts.iter().copied().collect(),
        };
        PreviewScheduler::new(backend, PreviewConfig::default())
    }

    fn tally(scheduler: &PreviewScheduler<ScriptedBackend>) -> Arc<Tally> {
        scheduler.backend().tally.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_respect_the_concurrency_limit() {
        let scheduler = scheduler(&[]);
        let tally = tally(&scheduler);
        let summary = scheduler
            .submit(sections(5), &PreviewPalette::default(), &[1, 2, 3, 4, 5])
            .await;

        assert_eq!(summary.captured, 5);
        assert_eq!(tally.peak.load(Ordering::SeqCst), 2);
        assert_eq!(tally.live.load(Ordering::SeqCst), 0);

        // Chunk two starts after chunk one's frame, settle and the chunk delay.
        let gap = tally.started_at(3) - tally.started_at(1);
        assert!(gap >= Duration::from_millis(250), "gap was {:?}", gap);
        assert_eq!(tally.started_at(2), tally.started_at(1));
        assert!(tally.started_at(5) > tally.started_at(3));
    }

    #[tokio::test(start_paused = true)]
    async fn submission_is_idempotent() {
        let scheduler = scheduler(&[]);
        let tally = tally(&scheduler);
        let snapshot = sections(4);
        let palette = PreviewPalette::default();

        scheduler.submit(snapshot.clone(), &palette, &[1, 2]).await;
        let again = scheduler.submit(snapshot.clone(), &palette, &[1, 2, 3, 3]).await;
        assert_eq!((again.scheduled, again.skipped), (1, 3));
        assert_eq!(tally.renders_of(1), 1);
        assert_eq!(tally.renders_of(3), 1);
        assert_eq!(scheduler.preview(2).unwrap().png, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submissions_render_once() {
        let scheduler = scheduler(&[]);
        let tally = tally(&scheduler);
        let snapshot = sections(1);
        let palette = PreviewPalette::default();

        let (first, second) = tokio::join!(
            scheduler.submit(snapshot.clone(), &palette, &[1]),
            scheduler.submit(snapshot.clone(), &palette, &[1]),
        );
        assert_eq!(first.scheduled + second.scheduled, 1);
        assert_eq!(first.skipped + second.skipped, 1);
        assert_eq!(first.captured + second.captured, 1);
        assert_eq!(tally.renders_of(1), 1);
        assert_eq!(scheduler.status(1), Some(JobStatus::Captured));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_submission_can_be_submitted_again() {
        let scheduler = scheduler(&[]);
        let tally = tally(&scheduler);
        let snapshot = sections(2);
        let palette = PreviewPalette::default();

        let cut_short = timeout(
            Duration::from_millis(10),
            scheduler.submit(snapshot.clone(), &palette, &[1, 2]),
        )
        .await;
        assert!(cut_short.is_err());
        assert_eq!(tally.renders_of(1), 1);
        assert_eq!(scheduler.status(1), None);
        assert_eq!(scheduler.status(2), None);
        assert_eq!(tally.live.load(Ordering::SeqCst), 0);

        let again = scheduler.submit(snapshot, &palette, &[1, 2]).await;
        assert_eq!((again.scheduled, again.captured), (2, 2));
        assert_eq!(tally.renders_of(1), 2);
        assert_eq!(scheduler.status(1), Some(JobStatus::Captured));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_job_is_torn_down_and_batch_continues() {
        let scheduler = scheduler(&[(2, Script::Hang)]);
        let tally = tally(&scheduler);
        let started = Instant::now();
        let summary = scheduler
            .submit(sections(3), &PreviewPalette::default(), &[1, 2, 3])
            .await;

        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.captured, 2);
        assert_eq!(scheduler.status(2), Some(JobStatus::TimedOut));
        assert!(scheduler.preview(2).is_none());
        assert_eq!(tally.live.load(Ordering::SeqCst), 0);
        assert_eq!(tally.active.load(Ordering::SeqCst), 0);
        assert!(tally.started_at(3) - started >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated_and_only_retried_on_request() {
        let scheduler = scheduler(&[(2, Script::Fail)]);
        let tally = tally(&scheduler);
        let snapshot = sections(3);
        let palette = PreviewPalette::default();

        let summary = scheduler.submit(snapshot.clone(), &palette, &[1, 2, 3]).await;
        assert_eq!((summary.captured, summary.failed), (2, 1));
        assert_eq!(scheduler.status(2), Some(JobStatus::Failed));
        assert!(scheduler.failure(2).unwrap().contains("scripted failure"));
        assert_eq!(tally.live.load(Ordering::SeqCst), 0);

        let resubmitted = scheduler.submit(snapshot.clone(), &palette, &[2]).await;
        assert_eq!(resubmitted.skipped, 1);
        assert_eq!(tally.renders_of(2), 1);

        let retried = scheduler.retry(snapshot, &palette, &[1, 2]).await;
        assert_eq!((retried.scheduled, retried.skipped), (1, 1));
        assert_eq!(tally.renders_of(2), 2);
        assert_eq!(tally.renders_of(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_section_fails_without_a_target() {
        let scheduler = scheduler(&[]);
        let tally = tally(&scheduler);
        scheduler
            .submit(sections(2), &PreviewPalette::default(), &[99])
            .await;

        assert_eq!(scheduler.status(99), Some(JobStatus::Failed));
        assert!(scheduler.failure(99).unwrap().contains("no points"));
        assert_eq!(tally.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_discards_in_flight_results() {
        let scheduler = scheduler(&[]);
        let tally = tally(&scheduler);
        let snapshot = sections(4);
        let palette = PreviewPalette::default();

        let (summary, ()) = tokio::join!(
            scheduler.submit(snapshot, &palette, &[1, 2, 3, 4]),
            async {
                sleep(Duration::from_millis(30)).await;
                scheduler.reset();
            }
        );

        assert_eq!(summary.discarded, 4);
        assert!(scheduler.previews().is_empty());
        assert_eq!(scheduler.status(1), None);
        assert_eq!(tally.renders_of(3), 0);
        assert_eq!(tally.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_sees_each_settled_job() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let scheduler = scheduler(&[(2, Script::Fail)]).with_observer(move |event| {
            sink.lock().push(event.clone());
        });

        let before = scheduler.revision();
        scheduler
            .submit(sections(2), &PreviewPalette::default(), &[1, 2])
            .await;

        let events = events.lock();
        let started = events
            .iter()
            .filter(|e| matches!(e, PreviewEvent::Started { .. }))
            .count();
        assert_eq!(started, 2);
        assert!(events
            .iter()
            .any(|e| matches!(e, PreviewEvent::Captured { section: 1, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, PreviewEvent::Failed { section: 2, .. })));
        assert_eq!(scheduler.revision(), before + 2);
    }

    #[test]
    fn config_follows_global_settings() {
        let global = GlobalConfig {
            max_concurrent_previews: 4,
            preview_timeout_ms: 500,
            slice_key: "slice".into(),
            ..GlobalConfig::default()
        };
        let config = PreviewConfig::from(&global);
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.slice_key, "slice");
        assert_eq!(config.size, PreviewConfig::default().size);
    }
}
