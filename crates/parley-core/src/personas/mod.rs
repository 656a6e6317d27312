pub mod persona;
pub mod registry;

pub use persona::Persona;
pub use registry::PersonaRegistry;
