pub mod aggregates;
pub mod conditions;
pub mod events;
pub mod value_objects;
