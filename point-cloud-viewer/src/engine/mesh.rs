use bevy::{prelude::*, render::mesh::PrimitiveTopology};
use point_cloud_attributes::Rgba;

/// Data space is Z-up, the scene is Y-up.
#[inline]
pub fn to_world(p: [f32; 3]) -> Vec3 {
    Vec3::new(p[0], p[2], -p[1])
}

pub fn world_positions(positions: &[[f32; 3]]) -> Vec<[f32; 3]> {
    positions.iter().map(|&p| to_world(p).to_array()).collect()
}

/// 8-bit RGBA to the linear float colours the vertex attribute expects.
pub fn vertex_colours(colours: &[Rgba]) -> Vec<[f32; 4]> {
    colours
        .iter()
        .map(|&[r, g, b, a]| {
            let linear = Color::srgba_u8(r, g, b, a).to_linear();
            [linear.red, linear.green, linear.blue, linear.alpha]
        })
        .collect()
}

pub fn create_point_mesh(positions: &[[f32; 3]], colours: &[Rgba]) -> Mesh {
    let mut mesh = Mesh::new(PrimitiveTopology::PointList, default());
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, world_positions(positions));
    mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, vertex_colours(colours));
    mesh
}
