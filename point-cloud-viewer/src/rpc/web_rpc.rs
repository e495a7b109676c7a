use crate::engine::point_cloud::{ViewMode, ViewerState};
use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy::prelude::*;
use constants::host::{ANNOTATION_CONFIG, CONTINUOUS_CONFIG, GLOBAL_CONFIG};
use point_cloud_attributes::colour::rgb_to_hex;
use point_cloud_attributes::{CategoryCode, FallbackPolicy, HostValue, SectionBrowser};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::JsValue;

#[cfg(target_arch = "wasm32")]
use web_sys::{MessageEvent, window};

/// JSON-RPC 2.0 request structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 notification structure for one-way communication.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

/// Outgoing messages, flushed once per frame.
#[derive(Resource, Default)]
pub struct WebRpcInterface {
    outgoing_notifications: Vec<RpcNotification>,
    outgoing_responses: Vec<RpcResponse>,
}

impl WebRpcInterface {
    pub fn send_notification(&mut self, method: &str, params: Value) {
        self.outgoing_notifications.push(RpcNotification {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        });
    }

    fn queue_response(&mut self, response: RpcResponse) {
        self.outgoing_responses.push(response);
    }
}

pub struct WebRpcPlugin;

impl Plugin for WebRpcPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<WebRpcInterface>()
            .add_event::<IncomingRpcMessage>()
            .add_systems(Startup, setup_message_listener)
            .add_systems(
                Update,
                (
                    process_incoming_messages,
                    handle_rpc_messages,
                    send_outgoing_messages,
                )
                    .chain(),
            );
    }
}

#[cfg(target_arch = "wasm32")]
fn setup_message_listener(mut commands: Commands) {
    let message_queue = MessageQueue::default();
    let queue = message_queue.0.clone();

    let closure = Closure::wrap(Box::new(move |event: MessageEvent| {
        if let Ok(data) = event.data().dyn_into::<js_sys::JsString>() {
            let message_str: String = data.into();
            if message_str.contains("jsonrpc") {
                if let Ok(mut queue) = queue.lock() {
                    queue.push(message_str);
                }
            }
        }
    }) as Box<dyn FnMut(MessageEvent)>);

    match window() {
        Some(window) => {
            if let Err(e) =
                window.add_event_listener_with_callback("message", closure.as_ref().unchecked_ref())
            {
                error!("Failed to register message listener: {:?}", e);
            }
        }
        None => error!("Window object not available"),
    }

    // Ownership moves to JS so the listener outlives this system.
    closure.forget();
    commands.insert_resource(message_queue);
}

#[cfg(not(target_arch = "wasm32"))]
fn setup_message_listener(mut commands: Commands) {
    use std::io::BufRead;

    let message_queue = MessageQueue::default();
    let queue = message_queue.0.clone();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.contains("jsonrpc") {
                if let Ok(mut queue) = queue.lock() {
                    queue.push(line);
                }
            }
        }
    });
    commands.insert_resource(message_queue);
}

#[derive(Resource, Default)]
struct MessageQueue(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

#[derive(Event)]
struct IncomingRpcMessage {
    content: String,
}

fn process_incoming_messages(
    message_queue: Option<Res<MessageQueue>>,
    mut message_events: EventWriter<IncomingRpcMessage>,
) {
    let Some(queue_res) = message_queue else {
        return;
    };

    let messages = if let Ok(mut queue) = queue_res.0.lock() {
        std::mem::take(&mut *queue)
    } else {
        Vec::new()
    };

    for message_str in messages {
        message_events.write(IncomingRpcMessage {
            content: message_str,
        });
    }
}

fn handle_rpc_messages(
    mut events: EventReader<IncomingRpcMessage>,
    diagnostics: Res<DiagnosticsStore>,
    mut state: ResMut<ViewerState>,
    mut rpc_interface: ResMut<WebRpcInterface>,
) {
    let fps = diagnostics
        .get(&FrameTimeDiagnosticsPlugin::FPS)
        .and_then(|fps_diagnostic| fps_diagnostic.smoothed())
        .unwrap_or(0.0) as f32;

    for event in events.read() {
        match serde_json::from_str::<RpcRequest>(&event.content) {
            Ok(request) => {
                if let Some(response) =
                    handle_rpc_request(&request, &mut state, fps, &mut rpc_interface)
                {
                    rpc_interface.queue_response(response);
                }
            }
            Err(parse_error) => warn!("Ignoring malformed RPC message: {}", parse_error),
        }
    }
}

/// Apply one request to the viewer state. Notifications (no id) get no reply.
pub fn handle_rpc_request(
    request: &RpcRequest,
    state: &mut ViewerState,
    fps: f32,
    rpc: &mut WebRpcInterface,
) -> Option<RpcResponse> {
    let params = &request.params;
    let result = match request.method.as_str() {
        "set_colouring_annotation" => handle_set_colouring_annotation(params, state),
        "select_category" => handle_select_category(params, state),
        "toggle_hidden" => handle_toggle_hidden(params, state),
        "set_custom_colour" => handle_set_custom_colour(params, state),
        "clear_custom_colour" => handle_clear_custom_colour(params, state),
        "set_threshold" => handle_set_threshold(params, state),
        "set_fallback" => handle_set_fallback(params, state),
        "set_active_field" => handle_set_active_field(params, state),
        "toggle_layout" => handle_toggle_layout(state, rpc),
        "enter_sections" => handle_enter_sections(state, rpc),
        "exit_sections" => {
            state.view = ViewMode::ThreeD;
            Ok(json!({ "success": true }))
        }
        "select_section" => handle_select_section(params, state, rpc),
        "set_property" => handle_set_property(params, state),
        "load_points" => handle_load_points(params, state),
        "get_categories" => handle_get_categories(params, state),
        "get_fps" => Ok(json!({ "fps": fps })),
        _ => {
            warn!("Unknown RPC method: {}", request.method);
            Err(RpcError {
                code: -32601,
                message: "Method not found".to_string(),
                data: Some(json!({ "method": request.method })),
            })
        }
    };

    let id = request.id.clone()?;
    Some(match result {
        Ok(result_value) => RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: Some(result_value),
            error: None,
            id: Some(id),
        },
        Err(error) => RpcResponse {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: Some(id),
        },
    })
}

fn parse<T: for<'de> Deserialize<'de>>(params: &Value, expected: &str) -> Result<T, RpcError> {
    serde_json::from_value::<T>(params.clone())
        .map_err(|_| RpcError::invalid_params(&format!("Expected {}", expected)))
}

#[derive(Deserialize)]
struct CategoryParams {
    dimension: String,
    code: CategoryCode,
}

fn handle_set_colouring_annotation(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        dimension: String,
    }
    let parsed: Params = parse(params, "'dimension'")?;
    let snapshot = state.bridge.snapshot();
    if !state.colours_mut().set_annotation_for_colouring(&parsed.dimension, &snapshot) {
        return Err(RpcError::invalid_params(&format!(
            "Annotation '{}' is not loaded",
            parsed.dimension
        )));
    }
    Ok(json!({ "success": true, "dimension": parsed.dimension }))
}

fn handle_select_category(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        dimension: String,
        code: Option<CategoryCode>,
    }
    let parsed: Params = parse(params, "'dimension' and 'code'")?;
    state.colours_mut().select_category(&parsed.dimension, parsed.code);
    Ok(json!({ "success": true, "selected": parsed.code }))
}

fn handle_toggle_hidden(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    let parsed: CategoryParams = parse(params, "'dimension' and 'code'")?;
    let hidden = state.colours_mut().toggle_hidden(&parsed.dimension, parsed.code);
    Ok(json!({ "success": true, "hidden": hidden }))
}

fn handle_set_custom_colour(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        dimension: String,
        code: CategoryCode,
        hex: String,
    }
    let parsed: Params = parse(params, "'dimension', 'code' and 'hex'")?;
    state
        .colours_mut()
        .set_custom_colour(&parsed.dimension, parsed.code, parsed.hex);
    Ok(json!({ "success": true }))
}

fn handle_clear_custom_colour(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    let parsed: CategoryParams = parse(params, "'dimension' and 'code'")?;
    state
        .colours_mut()
        .clear_custom_colour(&parsed.dimension, parsed.code);
    Ok(json!({ "success": true }))
}

fn handle_set_threshold(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        threshold: f64,
    }
    let parsed: Params = parse(params, "numeric 'threshold'")?;
    state.colours_mut().set_threshold(parsed.threshold);
    Ok(json!({ "success": true, "threshold": parsed.threshold }))
}

fn handle_set_fallback(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        policy: FallbackPolicy,
    }
    let parsed: Params = parse(params, "'policy' of neutral_grey or original_colour")?;
    state.colours_mut().set_fallback(parsed.policy);
    Ok(json!({ "success": true }))
}

fn handle_set_active_field(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        name: Option<String>,
    }
    let parsed: Params = parse(params, "'name'")?;
    if !state.bridge.set_active_field(parsed.name.as_deref()) {
        return Err(RpcError::invalid_params("Continuous field is not loaded"));
    }
    Ok(json!({ "success": true, "active": parsed.name }))
}

fn handle_toggle_layout(state: &mut ViewerState, rpc: &mut WebRpcInterface) -> Result<Value, RpcError> {
    if state.view != ViewMode::ThreeD {
        return Err(RpcError::invalid_params("Layouts apply to the 3D view only"));
    }
    let snapshot = state.bridge.snapshot();
    let dimension = state.colours.colouring_annotation.clone();
    let mode = state.layout.toggle(&snapshot, dimension.as_deref());
    rpc.send_notification("layout_changed", json!({ "mode": mode }));
    Ok(json!({ "success": true, "mode": mode }))
}

fn handle_enter_sections(state: &mut ViewerState, rpc: &mut WebRpcInterface) -> Result<Value, RpcError> {
    if state.enter_sections() == 0 {
        return Err(RpcError::invalid_params(&format!(
            "No sections under '{}'",
            state.sections.slice_key()
        )));
    }
    rpc.send_notification("section_changed", json!({ "section": state.sections.current() }));
    Ok(json!({
        "success": true,
        "sections": state.sections.available(),
        "current": state.sections.current(),
    }))
}

fn handle_select_section(
    params: &Value,
    state: &mut ViewerState,
    rpc: &mut WebRpcInterface,
) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        section: CategoryCode,
    }
    let parsed: Params = parse(params, "'section'")?;
    let changed = state.select_section(parsed.section);
    if changed {
        rpc.send_notification("section_changed", json!({ "section": parsed.section }));
    }
    Ok(json!({ "success": true, "changed": changed }))
}

fn handle_set_property(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        name: String,
        value: Value,
    }
    let parsed: Params = parse(params, "'name' and 'value'")?;
    let name = parsed.name.as_str();
    if ![ANNOTATION_CONFIG, CONTINUOUS_CONFIG, GLOBAL_CONFIG].contains(&name) {
        return Err(RpcError::invalid_params(&format!(
            "'{}' is not a JSON property",
            name
        )));
    }

    state.bridge.apply(name, &HostValue::Json(parsed.value));
    let snapshot = state.bridge.snapshot();
    match name {
        GLOBAL_CONFIG => {
            let global = state.bridge.global_config();
            state.colours_mut().set_fallback(global.fallback);
            if global.slice_key != state.sections.slice_key() {
                state.sections = SectionBrowser::new(global.slice_key);
                state.view = ViewMode::ThreeD;
            }
        }
        _ => {
            state.colours_mut().adopt_category_colours(&snapshot);
        }
    }
    Ok(json!({ "success": true, "issues": state.bridge.issues().len() }))
}

#[cfg(not(target_arch = "wasm32"))]
fn handle_load_points(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        path: String,
    }
    let parsed: Params = parse(params, "'path'")?;
    let points = point_cloud_attributes::laz::read_point_set_file(std::path::Path::new(&parsed.path))
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;
    let count = points.len();
    state.bridge.load_points(points);
    state.data_reloaded();
    Ok(json!({ "success": true, "points": count }))
}

#[cfg(target_arch = "wasm32")]
fn handle_load_points(_params: &Value, _state: &mut ViewerState) -> Result<Value, RpcError> {
    Err(RpcError::invalid_params("load_points is not available in the browser"))
}

fn handle_get_categories(params: &Value, state: &mut ViewerState) -> Result<Value, RpcError> {
    #[derive(Deserialize)]
    struct Params {
        dimension: String,
    }
    let parsed: Params = parse(params, "'dimension'")?;
    let snapshot = state.bridge.snapshot();
    let Some(dimension) = snapshot.annotations.get(&parsed.dimension) else {
        return Err(RpcError::invalid_params(&format!(
            "Annotation '{}' is not loaded",
            parsed.dimension
        )));
    };

    let defaults = state.colours.category_colours.get(&parsed.dimension);
    let custom = state.colours.custom_colours.get(&parsed.dimension);
    let categories: Vec<Value> = dimension
        .unique_codes()
        .into_iter()
        .map(|code| {
            let name = dimension
                .items
                .iter()
                .find(|item| item.code == code)
                .map(|item| item.name.clone());
            let colour = custom
                .and_then(|c| c.get(&code).cloned())
                .or_else(|| defaults.and_then(|d| d.get(&code)).map(|&rgb| rgb_to_hex(rgb)));
            json!({ "code": code, "name": name, "colour": colour })
        })
        .collect();
    Ok(json!({ "dimension": parsed.dimension, "categories": categories }))
}

fn send_outgoing_messages(mut rpc_interface: ResMut<WebRpcInterface>) {
    for notification in rpc_interface.outgoing_notifications.drain(..) {
        send_message_to_parent(&notification);
    }
    for response in rpc_interface.outgoing_responses.drain(..) {
        send_message_to_parent(&response);
    }
}

fn send_message_to_parent<T: Serialize>(message: &T) {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            return;
        }
    };

    #[cfg(target_arch = "wasm32")]
    {
        if let Some(window) = window() {
            if let Some(parent) = window.parent().ok().flatten() {
                if let Err(e) = parent.post_message(&JsValue::from_str(&json), "*") {
                    error!("Failed to send message to parent: {:?}", e);
                }
            } else {
                warn!("No parent window available for message transmission");
            }
        } else {
            error!("Window object not available");
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    println!("{}", json);
}

impl RpcError {
    pub fn invalid_params(message: &str) -> Self {
        Self {
            code: -32602,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn internal_error(message: &str) -> Self {
        Self {
            code: -32603,
            message: message.to_string(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use point_cloud_attributes::annotation::{AnnotationDimension, AnnotationItem, CategoryCodes};
    use point_cloud_attributes::{AttributeRepository, HostBridge, MemoryModel, PointSet};
    use std::sync::Arc;

    fn viewer() -> ViewerState {
        let mut model = MemoryModel::new();
        let mut bridge = HostBridge::attach(&mut model, Arc::new(AttributeRepository::new()));
        bridge.detach(&mut model);
        bridge.repository().commit(|draft| {
            draft.replace_points(PointSet::new(vec![0.0; 12], None));
            let annotations = Arc::make_mut(&mut draft.annotations);
            annotations.insert(AnnotationDimension::new(
                "cell_type",
                vec![AnnotationItem {
                    code: 1,
                    name: "neuron".into(),
                    colour: Some([255, 0, 0]),
                }],
                CategoryCodes::U8(vec![1, 1, 2, 2]),
            ));
            annotations.insert(AnnotationDimension::new(
                "section",
                vec![],
                CategoryCodes::U8(vec![3, 3, 4, 5]),
            ));
            annotations.set_default_dimension(Some("cell_type".into()));
        });
        ViewerState::new(bridge)
    }

    fn call(state: &mut ViewerState, method: &str, params: Value) -> RpcResponse {
        let request = RpcRequest {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id: Some(json!(1)),
        };
        handle_rpc_request(&request, state, 60.0, &mut WebRpcInterface::default()).unwrap()
    }

    #[test]
    fn colouring_commands_reach_the_binding() {
        let mut state = viewer();
        assert_eq!(state.colours.colouring_annotation.as_deref(), Some("cell_type"));
        assert_eq!(state.binding().get_colour(0), [255, 0, 0, 255]);

        call(&mut state, "select_category", json!({ "dimension": "cell_type", "code": 2 }));
        assert_eq!(state.binding().get_colour(0), [0, 0, 0, 5]);

        let response = call(&mut state, "toggle_hidden", json!({ "dimension": "cell_type", "code": 2 }));
        assert_eq!(response.result.unwrap()["hidden"], json!(true));
    }

    #[test]
    fn notifications_are_applied_without_reply() {
        let mut state = viewer();
        let request = RpcRequest {
            jsonrpc: "2.0".into(),
            method: "set_threshold".into(),
            params: json!({ "threshold": 2.5 }),
            id: None,
        };
        let mut rpc = WebRpcInterface::default();
        assert!(handle_rpc_request(&request, &mut state, 0.0, &mut rpc).is_none());
        assert_eq!(state.colours.threshold, 2.5);
    }

    #[test]
    fn bad_params_and_unknown_methods_are_errors() {
        let mut state = viewer();
        let response = call(&mut state, "set_threshold", json!({ "threshold": "high" }));
        assert_eq!(response.error.unwrap().code, -32602);

        let response = call(&mut state, "make_coffee", json!({}));
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn sections_are_entered_and_stepped() {
        let mut state = viewer();
        let response = call(&mut state, "enter_sections", json!({}));
        assert_eq!(response.result.unwrap()["sections"], json!([3, 4, 5]));
        assert_eq!(state.view, ViewMode::Sections);
        assert_eq!(state.sections.current(), Some(3));
        assert_eq!(state.binding().point_count(), 2);

        assert!(state.cycle_section(false));
        assert_eq!(state.sections.current(), Some(5));
        assert_eq!(state.binding().point_count(), 1);
    }

    #[test]
    fn categories_list_names_and_colours() {
        let mut state = viewer();
        call(
            &mut state,
            "set_custom_colour",
            json!({ "dimension": "cell_type", "code": 2, "hex": "#00ff00" }),
        );
        let response = call(&mut state, "get_categories", json!({ "dimension": "cell_type" }));
        let categories = response.result.unwrap()["categories"].clone();
        assert_eq!(categories[0]["name"], json!("neuron"));
        assert_eq!(categories[0]["colour"], json!("#ff0000"));
        assert_eq!(categories[1]["colour"], json!("#00ff00"));
    }
}
