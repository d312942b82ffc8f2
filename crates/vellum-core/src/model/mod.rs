pub mod category;
pub mod entity;
pub mod id;
pub mod operation;
pub mod property;

pub use category::{EntityCategory, MappingKind, StyleKind};
pub use entity::Persistable;
pub use id::StoreId;
pub use operation::OperationKind;
pub use property::{
    FieldDef, InnerObjectsDef, PrimitiveKind, PropertyDef, PropertySchema,
    COMPOSABLE_PROPERTY_NAMES,
};
