//! Entity categories and the fixed orders the flush phases walk them in.

use serde::Serialize;

/// Style partitions. Declared in flush order: deletes and inserts both walk
/// [`StyleKind::ALL`] front to back, since later kinds may reference
/// earlier ones (a cap style references a color style, never the reverse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StyleKind {
    Color,
    Cap,
    Line,
    Fill,
    Character,
    Paragraph,
}

impl StyleKind {
    pub const ALL: [StyleKind; 6] = [
        StyleKind::Color,
        StyleKind::Cap,
        StyleKind::Line,
        StyleKind::Fill,
        StyleKind::Character,
        StyleKind::Paragraph,
    ];
}

/// Model-mapping partitions, in flush order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MappingKind {
    Numeric,
    Format,
    Style,
}

impl MappingKind {
    pub const ALL: [MappingKind; 3] = [MappingKind::Numeric, MappingKind::Format, MappingKind::Style];
}

/// Category tag carried by every registered entity type.
///
/// The flush phases and the load family switch on this tag; there is no
/// runtime type inspection anywhere in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityCategory {
    Project,
    Design,
    Style(StyleKind),
    Template,
    ModelMapping(MappingKind),
    Model,
    ModelObject,
    DiagramModelObject,
    Diagram,
    Shape,
}

impl EntityCategory {
    /// True for the categories that can own same-category children
    /// (nested shapes, composite model objects).
    pub fn supports_nesting(self) -> bool {
        matches!(self, EntityCategory::Shape | EntityCategory::ModelObject)
    }
}
