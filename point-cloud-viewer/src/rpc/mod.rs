//! JSON-RPC 2.0 bridge between the viewer and its host UI.
//!
//! In the browser build messages arrive through `postMessage` from the parent
//! window. Native builds read one message per line from stdin and write
//! responses and notifications to stdout.
//!
//! ## Methods
//!
//! ### Colouring
//! - `set_colouring_annotation`: colour by `{dimension}`
//! - `select_category`: isolate `{dimension, code}`, `code: null` lifts it
//! - `toggle_hidden`: hide or show `{dimension, code}`
//! - `set_custom_colour` / `clear_custom_colour`: `{dimension, code, hex}`
//! - `set_threshold`: `{threshold}` for the active continuous field
//! - `set_fallback`: `{policy: "neutral_grey" | "original_colour"}`
//! - `set_active_field`: `{name}`, `null` returns to categorical colour
//!
//! ### Views
//! - `toggle_layout`: 3D and the flat treemap/histogram layout
//! - `enter_sections` / `exit_sections` / `select_section`
//!
//! ### Data
//! - `set_property`: `{name, value}` for the JSON host properties
//! - `load_points`: `{path}` of a LAZ file (native only)
//! - `get_categories`: `{dimension}` codes, names and colours
//! - `get_fps`
//!
//! Notifications sent to the host: `layout_changed`, `section_changed`.
//!
//! Standard JSON-RPC 2.0 error codes are used: `-32601` for unknown methods,
//! `-32602` for bad parameters, `-32603` for internal failures.

pub mod web_rpc;
