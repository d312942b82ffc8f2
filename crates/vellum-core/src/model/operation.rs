//! Operation kinds addressable through a command table.

use std::fmt;

/// The closed set of per-entity-type operations the engine executes.
///
/// A command table maps `(entity type name, OperationKind)` to a prepared
/// store command; the engine never composes SQL for these itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Insert with the container (different-category owner) bound at
    /// parameter position 1.
    Insert,
    /// Insert with a same-category parent bound at parameter position 1.
    InsertOwnedByParent,
    Update,
    /// Rewrites the owner columns only; parameters are
    /// `[identifier, owner identifier, owner-is-parent flag]`.
    UpdateOwner,
    Delete,
    SelectById,
    SelectByName,
    SelectByOwnerId,
    /// Entities under an owner that have no same-category parent.
    SelectAllRoots,
    /// Entities nested under a same-category parent.
    SelectChildren,
    CheckTemplateInUse,
    CheckStyleInUse,
    CheckModelObjectInUse,
    CheckShapeTypeInUse,
}

impl OperationKind {
    /// Verb used in diagnostics when a command for this kind is missing.
    pub fn action(self) -> &'static str {
        match self {
            OperationKind::Insert | OperationKind::InsertOwnedByParent => "inserting",
            OperationKind::Update | OperationKind::UpdateOwner => "updating",
            OperationKind::Delete => "deleting",
            OperationKind::SelectById
            | OperationKind::SelectByName
            | OperationKind::SelectByOwnerId
            | OperationKind::SelectAllRoots
            | OperationKind::SelectChildren => "loading",
            OperationKind::CheckTemplateInUse
            | OperationKind::CheckStyleInUse
            | OperationKind::CheckModelObjectInUse
            | OperationKind::CheckShapeTypeInUse => "checking use of",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
