pub mod camera;
pub mod mesh;
pub mod point_cloud;
#[cfg(not(target_arch = "wasm32"))]
pub mod previews;
