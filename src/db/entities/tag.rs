use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tags")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    // Normalized, globally unique
    #[sea_orm(unique)]
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub is_predefined: bool,
    pub category: Option<String>,
    pub display_order: Option<i32>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::image_tag::Entity")]
    ImageTag,
}

impl Related<super::image_tag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ImageTag.def()
    }
}

impl Related<super::image::Entity> for Entity {
    fn to() -> RelationDef {
        super::image_tag::Relation::Image.def()
    }
    fn via() -> Option<RelationDef> {
        Some(super::image_tag::Relation::Tag.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
