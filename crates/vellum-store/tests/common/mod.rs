// Shared fixture domain for the store integration tests.
//
// A small diagramming vocabulary: a settings root, a design with color
// styles, a template, a model with nestable parts, sheets (diagrams)
// holding boxes with composable vertices and glue-point child rows, and
// part links tying sheets to parts.

use vellum_core::errors::Result;
use vellum_core::logging;
use vellum_core::model::{
    EntityCategory, FieldDef, InnerObjectsDef, MappingKind, Persistable, PrimitiveKind,
    PropertyDef, PropertySchema, StoreId, StyleKind,
};
use vellum_core::registry::{EntityType, EntityTypeRegistry};
use vellum_core::transfer::{RepositoryReader, RepositoryWriter};
use vellum_store::{build_command_table, create_schema, db, Repository, REPOSITORY_VERSION};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Settings {
    pub author: String,
}

impl Persistable for Settings {
    fn type_name(&self) -> &str {
        "demo.settings"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_string(&self.author)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.author = reader.read_string()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Design {
    pub name: String,
}

impl Persistable for Design {
    fn type_name(&self) -> &str {
        "demo.design"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_string(&self.name)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.name = reader.read_string()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ColorStyle {
    pub name: String,
    pub argb: i32,
}

impl Persistable for ColorStyle {
    fn type_name(&self) -> &str {
        "demo.color_style"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_string(&self.name)?;
        writer.write_i32(self.argb)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.name = reader.read_string()?;
        self.argb = reader.read_i32()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Template {
    pub name: String,
}

impl Persistable for Template {
    fn type_name(&self) -> &str {
        "demo.template"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_string(&self.name)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.name = reader.read_string()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct StyleMapping {
    pub slot: i32,
}

impl Persistable for StyleMapping {
    fn type_name(&self) -> &str {
        "demo.style_mapping"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_i32(self.slot)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.slot = reader.read_i32()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ModelRoot {
    pub name: String,
}

impl Persistable for ModelRoot {
    fn type_name(&self) -> &str {
        "demo.model"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_string(&self.name)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.name = reader.read_string()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Part {
    pub label: String,
}

impl Persistable for Part {
    fn type_name(&self) -> &str {
        "demo.part"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_string(&self.label)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.label = reader.read_string()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PartLink {
    pub part_ref: Option<StoreId>,
}

impl Persistable for PartLink {
    fn type_name(&self) -> &str {
        "demo.part_link"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_id(self.part_ref)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.part_ref = reader.read_id()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Sheet {
    pub title: String,
}

impl Persistable for Sheet {
    fn type_name(&self) -> &str {
        "demo.sheet"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_string(&self.title)
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.title = reader.read_string()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct BoxShape {
    pub x: i32,
    pub y: i32,
    pub fill: Option<StoreId>,
    pub vertices: Vec<(i32, i32)>,
    pub glue_points: Vec<(i32, f32)>,
}

impl Persistable for BoxShape {
    fn type_name(&self) -> &str {
        "demo.box"
    }

    fn save_fields(&self, writer: &mut dyn RepositoryWriter, _version: u32) -> Result<()> {
        writer.write_i32(self.x)?;
        writer.write_i32(self.y)?;
        writer.write_id(self.fill)?;
        writer.begin_inner_objects()?;
        for (vx, vy) in &self.vertices {
            writer.begin_inner_object()?;
            writer.write_i32(*vx)?;
            writer.write_i32(*vy)?;
            writer.end_inner_object()?;
        }
        writer.end_inner_objects()?;
        writer.begin_inner_objects()?;
        for (index, offset) in &self.glue_points {
            writer.begin_inner_object()?;
            writer.write_i32(*index)?;
            writer.write_f32(*offset)?;
            writer.end_inner_object()?;
        }
        writer.end_inner_objects()?;
        Ok(())
    }

    fn load_fields(&mut self, reader: &mut dyn RepositoryReader, _version: u32) -> Result<()> {
        self.x = reader.read_i32()?;
        self.y = reader.read_i32()?;
        self.fill = reader.read_id()?;
        self.vertices.clear();
        reader.begin_inner_objects()?;
        while reader.next_inner_object()? {
            let vx = reader.read_i32()?;
            let vy = reader.read_i32()?;
            self.vertices.push((vx, vy));
        }
        reader.end_inner_objects()?;
        self.glue_points.clear();
        reader.begin_inner_objects()?;
        while reader.next_inner_object()? {
            let index = reader.read_i32()?;
            let offset = reader.read_f32()?;
            self.glue_points.push((index, offset));
        }
        reader.end_inner_objects()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

/// Field layout shared by every demo shape type.
#[allow(dead_code)]
fn shape_base_defs() -> Vec<PropertyDef> {
    PropertySchema::new()
        .field("x", PrimitiveKind::Int32)
        .field("y", PrimitiveKind::Int32)
        .build()
}

/// Registry with every demo type registered, in category order.
#[allow(dead_code)]
pub fn demo_registry() -> EntityTypeRegistry {
    logging::init(logging::Profile::Test);
    let mut registry = EntityTypeRegistry::new();
    registry
        .register(EntityType::new(
            "demo.settings",
            EntityCategory::Project,
            1,
            PropertySchema::new()
                .field("author", PrimitiveKind::Text)
                .build(),
            Box::new(|| Box::new(Settings::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.design",
            EntityCategory::Design,
            1,
            PropertySchema::new()
                .field("name", PrimitiveKind::Text)
                .build(),
            Box::new(|| Box::new(Design::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.color_style",
            EntityCategory::Style(StyleKind::Color),
            1,
            PropertySchema::new()
                .field("name", PrimitiveKind::Text)
                .field("argb", PrimitiveKind::Int32)
                .build(),
            Box::new(|| Box::new(ColorStyle::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.template",
            EntityCategory::Template,
            1,
            PropertySchema::new()
                .field("name", PrimitiveKind::Text)
                .build(),
            Box::new(|| Box::new(Template::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.style_mapping",
            EntityCategory::ModelMapping(MappingKind::Style),
            1,
            PropertySchema::new()
                .field("slot", PrimitiveKind::Int32)
                .build(),
            Box::new(|| Box::new(StyleMapping::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.model",
            EntityCategory::Model,
            1,
            PropertySchema::new()
                .field("name", PrimitiveKind::Text)
                .build(),
            Box::new(|| Box::new(ModelRoot::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.part",
            EntityCategory::ModelObject,
            1,
            PropertySchema::new()
                .field("label", PrimitiveKind::Text)
                .build(),
            Box::new(|| Box::new(Part::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.part_link",
            EntityCategory::DiagramModelObject,
            1,
            PropertySchema::new()
                .reference("part_ref", "demo.part")
                .build(),
            Box::new(|| Box::new(PartLink::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.sheet",
            EntityCategory::Diagram,
            1,
            PropertySchema::new()
                .field("title", PrimitiveKind::Text)
                .build(),
            Box::new(|| Box::new(Sheet::default())),
        ))
        .unwrap();
    registry
        .register(EntityType::new(
            "demo.box",
            EntityCategory::Shape,
            1,
            PropertySchema::extending(shape_base_defs())
                .reference("fill", "demo.color_style")
                .inner_objects(InnerObjectsDef::new(
                    "vertices",
                    "demo.vertex",
                    vec![
                        FieldDef::new("vx", PrimitiveKind::Int32),
                        FieldDef::new("vy", PrimitiveKind::Int32),
                    ],
                ))
                .inner_objects(InnerObjectsDef::new(
                    "glue_points",
                    "demo.glue_point",
                    vec![
                        FieldDef::new("idx", PrimitiveKind::Int32),
                        FieldDef::new("spread", PrimitiveKind::Float32),
                    ],
                ))
                .build(),
            Box::new(|| Box::new(BoxShape::default())),
        ))
        .unwrap();
    registry
}

/// A repository over a fresh in-memory store, schema and commands included.
#[allow(dead_code)]
pub fn fresh_repository(project_name: &str) -> Repository {
    let conn = db::open_in_memory().unwrap();
    let registry = demo_registry();
    create_schema(&conn, &registry, REPOSITORY_VERSION).unwrap();
    let commands = build_command_table(&registry).unwrap();
    Repository::create(conn, registry, commands, project_name, REPOSITORY_VERSION).unwrap()
}

/// Same as [`fresh_repository`] but at an explicit repository version.
#[allow(dead_code)]
pub fn fresh_repository_at(project_name: &str, version: u32) -> Repository {
    let conn = db::open_in_memory().unwrap();
    let registry = demo_registry();
    create_schema(&conn, &registry, version).unwrap();
    let commands = build_command_table(&registry).unwrap();
    Repository::create(conn, registry, commands, project_name, version).unwrap()
}
