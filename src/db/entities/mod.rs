//! SeaORM entities for the catalog tables.
//!
//! `images` and `tags` are independent; `image_tags` is the junction relation with
//! cascading deletes from either side.

pub mod image;
pub mod image_tag;
pub mod tag;
