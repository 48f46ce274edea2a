//! Components, systems and others to create, link and render portals

mod api;
pub use api::*;
mod backend;
pub use backend::*;
mod create;
pub use create::*;
mod deactivate;
pub use deactivate::*;
mod dispatch;
pub use dispatch::*;
pub mod projection;
mod render;
pub use render::*;
mod traveller;
pub use traveller::*;
pub mod visibility;
