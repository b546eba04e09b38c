pub mod image_routes;
pub mod tag_routes;
