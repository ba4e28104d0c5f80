// Scene data - meshes, materials and the objects that use them
//
// Meshes and materials are owned by name-keyed registries. RenderObjects
// only refer to them by name, so the registries must be filled first.

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::cell::RefCell;
use std::collections::HashMap;
use std::mem::{offset_of, size_of};
use std::rc::Rc;

use crate::backend::{AllocatedBuffer, DeletionQueue, ResourceAllocator};
use crate::config::SceneConfig;
use crate::error::RendererError;

/// Mesh and material name used by the built-in triangle grid
pub const DEFAULT_MESH: &str = "triangle";
pub const DEFAULT_MATERIAL: &str = "defaultmesh";

// =============================================================================
// GPU-FACING LAYOUTS
// =============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub color: Vec3,
}

impl Vertex {
    /// One interleaved binding; locations 0/1/2 are position, normal, color
    pub fn input_description() -> (
        Vec<vk::VertexInputBindingDescription>,
        Vec<vk::VertexInputAttributeDescription>,
    ) {
        let bindings = vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];

        let attribute = |location: u32, offset: usize| vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset as u32,
        };
        let attributes = vec![
            attribute(0, offset_of!(Vertex, position)),
            attribute(1, offset_of!(Vertex, normal)),
            attribute(2, offset_of!(Vertex, color)),
        ];

        (bindings, attributes)
    }
}

/// Per-draw block pushed to the vertex stage
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct MeshPushConstants {
    pub data: Vec4,
    pub render_matrix: Mat4,
}

impl MeshPushConstants {
    pub fn new(render_matrix: Mat4) -> Self {
        Self {
            data: Vec4::ZERO,
            render_matrix,
        }
    }

    pub fn range() -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: size_of::<Self>() as u32,
        }
    }
}

/// The built-in green triangle
pub fn triangle_vertices() -> Vec<Vertex> {
    let green = Vec3::new(0.0, 1.0, 0.0);
    [
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(-1.0, 1.0, 0.0),
        Vec3::new(0.0, -1.0, 0.0),
    ]
    .into_iter()
    .map(|position| Vertex {
        position,
        normal: Vec3::ZERO,
        color: green,
    })
    .collect()
}

// =============================================================================
// REGISTRY ENTRIES
// =============================================================================

/// Vertex list plus the write-once buffer holding a copy of it
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub vertex_buffer: AllocatedBuffer,
}

impl Mesh {
    /// Upload `vertices` into a new vertex buffer
    pub fn upload(
        allocator: &Rc<RefCell<ResourceAllocator>>,
        name: &str,
        vertices: Vec<Vertex>,
        deletion_queue: &mut DeletionQueue,
    ) -> Result<Self> {
        let vertex_buffer = ResourceAllocator::upload(
            allocator,
            name,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &vertices,
            deletion_queue,
        )?;

        Ok(Self {
            vertices,
            vertex_buffer,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Material {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

#[derive(Debug, Clone)]
pub struct RenderObject {
    pub mesh: String,
    pub material: String,
    pub transform: Mat4,
}

/// One resolved draw. Bind fields are only set when they differ from the
/// previous draw in the list.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub bind_material: Option<Material>,
    pub bind_vertex_buffer: Option<vk::Buffer>,
    pub layout: vk::PipelineLayout,
    pub vertex_count: u32,
    pub transform: Mat4,
}

#[derive(Debug, Default)]
pub struct Scene {
    meshes: HashMap<String, Mesh>,
    materials: HashMap<String, Material>,
    renderables: Vec<RenderObject>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named material
    pub fn create_material(
        &mut self,
        name: &str,
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    ) -> Material {
        let material = Material { pipeline, layout };
        self.materials.insert(name.to_string(), material);
        material
    }

    pub fn get_material(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    pub fn insert_mesh(&mut self, name: &str, mesh: Mesh) {
        self.meshes.insert(name.to_string(), mesh);
    }

    pub fn get_mesh(&self, name: &str) -> Option<&Mesh> {
        self.meshes.get(name)
    }

    /// Append a renderable; its mesh and material must already be registered
    pub fn add_renderable(&mut self, object: RenderObject) -> Result<(), RendererError> {
        if !self.meshes.contains_key(&object.mesh) {
            return Err(RendererError::UnknownMesh(object.mesh));
        }
        if !self.materials.contains_key(&object.material) {
            return Err(RendererError::UnknownMaterial(object.material));
        }

        self.renderables.push(object);
        Ok(())
    }

    pub fn renderables(&self) -> &[RenderObject] {
        &self.renderables
    }

    /// Resolve renderables in insertion order, dropping redundant binds
    pub fn draw_list(&self) -> Result<Vec<DrawItem>, RendererError> {
        let mut items = Vec::with_capacity(self.renderables.len());
        let mut last_material: Option<&str> = None;
        let mut last_mesh: Option<&str> = None;

        for object in &self.renderables {
            let material = self
                .get_material(&object.material)
                .ok_or_else(|| RendererError::UnknownMaterial(object.material.clone()))?;
            let mesh = self
                .get_mesh(&object.mesh)
                .ok_or_else(|| RendererError::UnknownMesh(object.mesh.clone()))?;

            let bind_material = (last_material != Some(object.material.as_str())).then_some(*material);
            let bind_vertex_buffer =
                (last_mesh != Some(object.mesh.as_str())).then_some(mesh.vertex_buffer.buffer);
            last_material = Some(object.material.as_str());
            last_mesh = Some(object.mesh.as_str());

            items.push(DrawItem {
                bind_material,
                bind_vertex_buffer,
                layout: material.layout,
                vertex_count: mesh.vertex_count(),
                transform: object.transform,
            });
        }

        Ok(items)
    }
}

/// Transforms for a (2r+1)x(2r+1) grid of small objects on the XZ plane
pub fn grid_transforms(radius: i32) -> Vec<Mat4> {
    let radius = radius.max(0);
    let scale = Mat4::from_scale(Vec3::splat(0.2));

    (-radius..=radius)
        .flat_map(|x| {
            (-radius..=radius).map(move |y| {
                Mat4::from_translation(Vec3::new(x as f32, 0.0, y as f32)) * scale
            })
        })
        .collect()
}

// =============================================================================
// CAMERA AND ANIMATION
// =============================================================================

#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn from_config(config: &SceneConfig) -> Self {
        Self {
            position: Vec3::from_array(config.camera_position),
            fov_y_degrees: config.fov_y_degrees,
            near: 0.1,
            far: 200.0,
        }
    }

    /// The world is moved by the camera position; there is no rotation
    pub fn view(&self) -> Mat4 {
        Mat4::from_translation(self.position)
    }

    /// Right-handed perspective with Y flipped for Vulkan clip space
    pub fn projection(&self, extent: vk::Extent2D) -> Mat4 {
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut projection =
            Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    pub fn view_projection(&self, extent: vk::Extent2D) -> Mat4 {
        self.projection(extent) * self.view()
    }
}

/// Rotation about +Y proportional to the frame counter
pub fn spin(frame_number: u64, degrees_per_frame: f32) -> Mat4 {
    Mat4::from_rotation_y((frame_number as f32 * degrees_per_frame).to_radians())
}

/// Clear color with a blue channel pulsing on the frame counter
pub fn clear_color(frame_number: u64) -> [f32; 4] {
    let flash = (frame_number as f32 / 120.0).sin().abs();
    [0.0, 0.0, flash, 1.0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fake_mesh(buffer: u64) -> Mesh {
        use ash::vk::Handle;
        Mesh {
            vertices: triangle_vertices(),
            vertex_buffer: AllocatedBuffer {
                buffer: vk::Buffer::from_raw(buffer),
            },
        }
    }

    fn object(mesh: &str, material: &str) -> RenderObject {
        RenderObject {
            mesh: mesh.to_string(),
            material: material.to_string(),
            transform: Mat4::IDENTITY,
        }
    }

    fn scene_with(meshes: &[(&str, u64)], materials: &[&str]) -> Scene {
        use ash::vk::Handle;
        let mut scene = Scene::new();
        for &(name, buffer) in meshes {
            scene.insert_mesh(name, fake_mesh(buffer));
        }
        for (i, name) in materials.iter().enumerate() {
            scene.create_material(
                name,
                vk::Pipeline::from_raw(i as u64 + 1),
                vk::PipelineLayout::from_raw(i as u64 + 100),
            );
        }
        scene
    }

    #[test]
    fn vertex_layout_matches_shader_locations() {
        let (bindings, attributes) = Vertex::input_description();

        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].stride, 36);
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
    }

    #[test]
    fn push_constants_fit_the_guaranteed_limit() {
        assert_eq!(size_of::<MeshPushConstants>(), 80);
        assert_eq!(MeshPushConstants::range().size, 80);
        assert!(MeshPushConstants::range().size <= crate::backend::pipeline::MAX_PUSH_CONSTANT_BYTES);
    }

    #[test]
    fn builtin_triangle_is_green() {
        let vertices = triangle_vertices();

        assert_eq!(vertices.len(), 3);
        assert!(vertices.iter().all(|v| v.color == Vec3::new(0.0, 1.0, 0.0)));
        assert_eq!(vertices[2].position, Vec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn clear_color_pulses_blue() {
        assert_eq!(clear_color(0), [0.0, 0.0, 0.0, 1.0]);

        let color = clear_color(188);
        assert_relative_eq!(color[2], (188.0f32 / 120.0).sin().abs());
        assert!((0.0..=1.0).contains(&color[2]));
    }

    #[test]
    fn spin_rotates_about_y() {
        assert!(spin(0, 0.4).abs_diff_eq(Mat4::IDENTITY, 1e-6));

        let quarter = spin(225, 0.4);
        let rotated = quarter.transform_vector3(Vec3::X);
        assert!(rotated.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-5));
    }

    #[test]
    fn projection_flips_y() {
        let camera = Camera::from_config(&SceneConfig::default());
        let extent = vk::Extent2D { width: 1700, height: 900 };

        let projection = camera.projection(extent);
        let unflipped = Mat4::perspective_rh(70f32.to_radians(), 1700.0 / 900.0, 0.1, 200.0);

        assert!(projection.y_axis.y < 0.0);
        assert_relative_eq!(projection.y_axis.y, -unflipped.y_axis.y);
        assert_relative_eq!(projection.x_axis.x, unflipped.x_axis.x);
    }

    #[test]
    fn view_translates_by_camera_position() {
        let camera = Camera::from_config(&SceneConfig::default());

        let origin = camera.view().transform_point3(Vec3::ZERO);

        assert_eq!(origin, Vec3::new(0.0, -6.0, -10.0));
    }

    #[test]
    fn grid_covers_every_cell() {
        let transforms = grid_transforms(2);

        assert_eq!(transforms.len(), 25);
        let first = transforms[0].transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!(first.abs_diff_eq(Vec3::new(-1.8, 0.0, -2.0), 1e-6));
        assert_eq!(grid_transforms(-3).len(), 1);
    }

    #[test]
    fn registry_lookups() {
        let scene = scene_with(&[("triangle", 7)], &["defaultmesh"]);

        assert!(scene.get_mesh("triangle").is_some());
        assert!(scene.get_mesh("monkey").is_none());
        assert!(scene.get_material("defaultmesh").is_some());
        assert!(scene.get_material("wireframe").is_none());
    }

    #[test]
    fn renderables_must_reference_known_entries() {
        let mut scene = scene_with(&[("triangle", 7)], &["defaultmesh"]);

        let err = scene.add_renderable(object("monkey", "defaultmesh")).unwrap_err();
        assert!(matches!(err, RendererError::UnknownMesh(name) if name == "monkey"));

        let err = scene.add_renderable(object("triangle", "wireframe")).unwrap_err();
        assert!(matches!(err, RendererError::UnknownMaterial(name) if name == "wireframe"));

        assert!(scene.add_renderable(object("triangle", "defaultmesh")).is_ok());
        assert_eq!(scene.renderables().len(), 1);
    }

    #[test]
    fn draw_list_skips_redundant_binds() {
        let mut scene = scene_with(&[("a", 1), ("b", 2)], &["red", "blue"]);
        for (mesh, material) in [("a", "red"), ("a", "red"), ("b", "red"), ("b", "blue")] {
            scene.add_renderable(object(mesh, material)).unwrap();
        }

        let items = scene.draw_list().unwrap();

        let material_binds: Vec<bool> = items.iter().map(|i| i.bind_material.is_some()).collect();
        let buffer_binds: Vec<bool> = items.iter().map(|i| i.bind_vertex_buffer.is_some()).collect();
        assert_eq!(material_binds, vec![true, false, false, true]);
        assert_eq!(buffer_binds, vec![true, false, true, false]);
        assert!(items.iter().all(|i| i.vertex_count == 3));
    }
}
