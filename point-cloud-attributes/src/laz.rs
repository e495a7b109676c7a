use crate::annotation::Rgba;
use crate::error::{AttributeError, AttributeResult};
use crate::snapshot::PointSet;
use las::Reader;
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

/// Create LAS file reader for point cloud access.
/// Handles both .las and .laz compressed formats.
pub fn create_reader(file_path: &Path) -> AttributeResult<Reader> {
    let file = File::open(file_path)?;
    Ok(Reader::new(BufReader::new(file))?)
}

/// Decode an in-memory LAS/LAZ blob into positions and, when the point format
/// carries colour, the original per-point colours.
pub fn read_point_set(bytes: &[u8]) -> AttributeResult<PointSet> {
    let reader = Reader::new(Cursor::new(bytes.to_vec()))?;
    collect_points(reader)
}

pub fn read_point_set_file(file_path: &Path) -> AttributeResult<PointSet> {
    collect_points(create_reader(file_path)?)
}

fn collect_points(mut reader: Reader) -> AttributeResult<PointSet> {
    let total_points = reader.header().number_of_points() as usize;
    let mut positions = Vec::with_capacity(total_points * 3);
    let mut colours: Vec<[u16; 3]> = Vec::new();

    for point_result in reader.points() {
        let point = point_result?;
        positions.extend_from_slice(&[point.x, point.y, point.z]);
        if let Some(c) = point.color {
            colours.push([c.red, c.green, c.blue]);
        }
    }

    if positions.is_empty() {
        return Err(AttributeError::EmptyPointCloud);
    }

    let point_count = positions.len() / 3;
    let original_colours = (colours.len() == point_count).then(|| to_rgba8(&colours));
    log::info!(
        "Loaded {} points ({})",
        point_count,
        if original_colours.is_some() { "with colour" } else { "no colour" }
    );
    Ok(PointSet::new(positions, original_colours))
}

/// Narrow LAS colour channels to 8 bits. Files that already store 8-bit values
/// in the 16-bit fields are kept as they are.
pub fn to_rgba8(colours: &[[u16; 3]]) -> Vec<Rgba> {
    let wide = colours.iter().flatten().any(|&channel| channel > u8::MAX as u16);
    let narrow = |channel: u16| if wide { (channel >> 8) as u8 } else { channel as u8 };
    colours
        .iter()
        .map(|&[r, g, b]| [narrow(r), narrow(g), narrow(b), 255])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrows_sixteen_bit_colour() {
        let colours = to_rgba8(&[[65535, 256, 0], [512, 0, 0]]);
        assert_eq!(colours, vec![[255, 1, 0, 255], [2, 0, 0, 255]]);
    }

    #[test]
    fn keeps_eight_bit_colour() {
        assert_eq!(to_rgba8(&[[255, 10, 0]]), vec![[255, 10, 0, 255]]);
    }

    #[test]
    fn rejects_garbage_bytes() {
        assert!(matches!(
            read_point_set(b"definitely not a point cloud"),
            Err(AttributeError::Las(_))
        ));
    }
}
