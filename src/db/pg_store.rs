//! PostgreSQL implementation of the catalog stores, built on SeaORM.
//!
//! Plain lookups go through the entity query builder. The tag-set predicates are raw SQL
//! because they need `GROUP BY ... HAVING COUNT(DISTINCT ...)` over the junction table;
//! their `ORDER BY` is assembled only from whitelisted [`SortOptions`] identifiers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, FromQueryResult,
    IntoActiveModel, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, Statement,
    TransactionTrait, Value,
};
use tracing::debug;

use crate::db::entities::{image, image_tag, tag};
use crate::db::store::{ImageStore, TagStore};
use crate::error::{CatalogError, Result};
use crate::models::{Image, Metadata, NewImage, NewTag, Tag, TagWithCount};
use crate::query::{SortField, SortOptions, SortOrder, TagFilter};

#[derive(Clone)]
pub struct PgCatalogStore {
    db: DatabaseConnection,
}

impl PgCatalogStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(FromQueryResult, Debug)]
struct CountRow {
    total: i64,
}

#[derive(FromQueryResult, Debug)]
struct TagCountRow {
    id: i64,
    name: String,
    description: Option<String>,
    color: Option<String>,
    is_predefined: bool,
    category: Option<String>,
    display_order: Option<i32>,
    created_at: DateTime<Utc>,
    image_count: i64,
}

impl From<TagCountRow> for TagWithCount {
    fn from(row: TagCountRow) -> Self {
        TagWithCount {
            tag: Tag {
                id: row.id,
                name: row.name,
                description: row.description,
                color: row.color,
                created_at: row.created_at,
                is_predefined: row.is_predefined,
                category: row.category,
                display_order: row.display_order,
            },
            image_count: row.image_count,
        }
    }
}

fn tag_from_model(model: tag::Model) -> Tag {
    Tag {
        id: model.id,
        name: model.name,
        description: model.description,
        color: model.color,
        created_at: model.created_at,
        is_predefined: model.is_predefined,
        category: model.category,
        display_order: model.display_order,
    }
}

fn image_from_model(model: image::Model) -> Result<Image> {
    let metadata = match model.metadata {
        Some(value) => Some(Metadata::parse(&value.to_string())?),
        None => None,
    };
    Ok(Image {
        id: model.id,
        filename: model.filename,
        original_filename: model.original_filename,
        content_type: model.content_type,
        file_size: model.file_size,
        storage_path: model.storage_path,
        thumbnail_path: model.thumbnail_path,
        width: model.width,
        height: model.height,
        uploaded_at: model.uploaded_at,
        metadata,
        created_at: model.created_at,
        updated_at: model.updated_at,
        tags: Vec::new(),
    })
}

fn images_from_models(models: Vec<image::Model>) -> Result<Vec<Image>> {
    models.into_iter().map(image_from_model).collect()
}

fn metadata_to_json(metadata: Option<&Metadata>) -> Result<Option<serde_json::Value>> {
    metadata
        .map(|m| serde_json::from_str(m.as_str()))
        .transpose()
        .map_err(CatalogError::from)
}

fn sort_column(field: SortField) -> image::Column {
    match field {
        SortField::UploadedAt => image::Column::UploadedAt,
        SortField::Filename => image::Column::Filename,
        SortField::FileSize => image::Column::FileSize,
        SortField::CreatedAt => image::Column::CreatedAt,
    }
}

/// `WHERE` fragment selecting images of `filter` from `images i`, plus its bind values.
/// Placeholders start at `$1`.
fn tag_predicate(filter: &TagFilter) -> (String, Vec<Value>) {
    let names: Vec<String> = filter.names().to_vec();
    if filter.match_all() {
        (
            r#"i.id IN (
                SELECT it.image_id
                FROM image_tags it
                INNER JOIN tags t ON t.id = it.tag_id
                WHERE t.name = ANY($1)
                GROUP BY it.image_id
                HAVING COUNT(DISTINCT t.name) = $2
            )"#
            .to_string(),
            vec![names.into(), (filter.names().len() as i64).into()],
        )
    } else {
        (
            r#"EXISTS (
                SELECT 1
                FROM image_tags it
                INNER JOIN tags t ON t.id = it.tag_id
                WHERE it.image_id = i.id AND t.name = ANY($1)
            )"#
            .to_string(),
            vec![names.into()],
        )
    }
}

/// One page of the images selected by `filter`, in `sort` order.
fn tag_filtered_page_statement(filter: &TagFilter, sort: SortOptions, limit: u64, offset: u64) -> Statement {
    let (predicate, mut values) = tag_predicate(filter);
    let limit_idx = values.len() + 1;
    let offset_idx = values.len() + 2;
    let sql = format!(
        "SELECT i.* FROM images i WHERE {predicate} ORDER BY {order} LIMIT ${limit_idx} OFFSET ${offset_idx}",
        order = sort.order_by_sql("i"),
    );
    values.push((limit as i64).into());
    values.push((offset as i64).into());
    Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
}

fn tag_filtered_count_statement(filter: &TagFilter) -> Statement {
    let (predicate, values) = tag_predicate(filter);
    let sql = format!("SELECT COUNT(*) AS total FROM images i WHERE {predicate}");
    Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
}

/// Replaces the junction rows of one image on `conn`, normally an open transaction.
async fn write_image_tags<C: ConnectionTrait>(conn: &C, image_id: i64, tag_ids: &[i64]) -> Result<()> {
    image_tag::Entity::delete_many()
        .filter(image_tag::Column::ImageId.eq(image_id))
        .exec(conn)
        .await?;

    if !tag_ids.is_empty() {
        let now = Utc::now();
        let links = tag_ids.iter().map(|&tag_id| image_tag::ActiveModel {
            image_id: Set(image_id),
            tag_id: Set(tag_id),
            created_at: Set(now),
        });
        image_tag::Entity::insert_many(links).exec(conn).await?;
    }
    Ok(())
}

#[async_trait]
impl ImageStore for PgCatalogStore {
    async fn insert_image(&self, new_image: NewImage) -> Result<Image> {
        let now = Utc::now();
        let metadata = metadata_to_json(new_image.metadata.as_ref())?;
        let model = image::ActiveModel {
            filename: Set(new_image.filename),
            original_filename: Set(new_image.original_filename),
            content_type: Set(new_image.content_type),
            file_size: Set(new_image.file_size),
            storage_path: Set(new_image.storage_path),
            thumbnail_path: Set(new_image.thumbnail_path),
            width: Set(new_image.width),
            height: Set(new_image.height),
            uploaded_at: Set(new_image.uploaded_at),
            metadata: Set(metadata),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default() // id will be set by the database
        }
        .insert(&self.db)
        .await?;
        image_from_model(model)
    }

    async fn find_image(&self, id: i64) -> Result<Image> {
        let model = image::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("image {id}")))?;
        image_from_model(model)
    }

    async fn update_image(&self, updated: &Image, tag_ids: &[i64]) -> Result<Image> {
        let txn = self.db.begin().await?;
        let existing = image::Entity::find_by_id(updated.id)
            .one(&txn)
            .await?
            .ok_or_else(|| CatalogError::not_found(format!("image {}", updated.id)))?;

        let mut active_model = existing.into_active_model();
        active_model.original_filename = Set(updated.original_filename.clone());
        active_model.thumbnail_path = Set(updated.thumbnail_path.clone());
        active_model.width = Set(updated.width);
        active_model.height = Set(updated.height);
        active_model.metadata = Set(metadata_to_json(updated.metadata.as_ref())?);
        active_model.updated_at = Set(Utc::now());

        let model = active_model.update(&txn).await?;
        write_image_tags(&txn, updated.id, tag_ids).await?;

        txn.commit().await?;
        image_from_model(model)
    }

    async fn delete_image(&self, id: i64) -> Result<()> {
        let result = image::Entity::delete_by_id(id).exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Err(CatalogError::not_found(format!("image {id}")));
        }
        Ok(())
    }

    async fn list_images(&self, sort: SortOptions, limit: u64, offset: u64) -> Result<Vec<Image>> {
        let column = sort_column(sort.field);
        let query = match sort.order {
            SortOrder::Asc => image::Entity::find().order_by_asc(column),
            SortOrder::Desc => image::Entity::find().order_by_desc(column),
        };
        let models = query
            .order_by_asc(image::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?;
        images_from_models(models)
    }

    async fn list_images_by_tags(
        &self,
        filter: &TagFilter,
        sort: SortOptions,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Image>> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }
        debug!(match_all = filter.match_all(), tags = ?filter.names(), "Running tag-filtered image query");
        let models = image::Entity::find()
            .from_raw_sql(tag_filtered_page_statement(filter, sort, limit, offset))
            .all(&self.db)
            .await?;
        images_from_models(models)
    }

    async fn count_images(&self) -> Result<i64> {
        Ok(image::Entity::find().count(&self.db).await? as i64)
    }

    async fn count_images_by_tags(&self, filter: &TagFilter) -> Result<i64> {
        if filter.is_empty() {
            return Ok(0);
        }
        let row = CountRow::find_by_statement(tag_filtered_count_statement(filter))
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.total).unwrap_or(0))
    }

    async fn count_images_by_content_type(&self, content_type: &str) -> Result<i64> {
        let count = image::Entity::find()
            .filter(image::Column::ContentType.eq(content_type))
            .count(&self.db)
            .await?;
        Ok(count as i64)
    }
}

const TAG_COUNT_SELECT: &str = r#"
    SELECT
        t.id, t.name, t.description, t.color, t.is_predefined, t.category, t.display_order, t.created_at,
        COUNT(it.image_id) AS image_count
    FROM tags t
    LEFT JOIN image_tags it ON it.tag_id = t.id
    GROUP BY t.id
"#;

#[async_trait]
impl TagStore for PgCatalogStore {
    async fn find_tag(&self, id: i64) -> Result<Tag> {
        tag::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(tag_from_model)
            .ok_or_else(|| CatalogError::not_found(format!("tag {id}")))
    }

    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let model = tag::Entity::find()
            .filter(tag::Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(model.map(tag_from_model))
    }

    async fn insert_tag(&self, new_tag: NewTag) -> Result<Tag> {
        let model = tag::ActiveModel {
            name: Set(new_tag.name),
            description: Set(new_tag.description),
            color: Set(new_tag.color),
            is_predefined: Set(new_tag.is_predefined),
            category: Set(new_tag.category),
            display_order: Set(new_tag.display_order),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&self.db)
        .await?;
        Ok(tag_from_model(model))
    }

    async fn delete_tag(&self, id: i64) -> Result<()> {
        // ON DELETE CASCADE removes the image_tags rows.
        let result = tag::Entity::delete_by_id(id).exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Err(CatalogError::not_found(format!("tag {id}")));
        }
        Ok(())
    }

    async fn tags_for_images(&self, image_ids: &[i64]) -> Result<Vec<(i64, Tag)>> {
        if image_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = image_tag::Entity::find()
            .find_also_related(tag::Entity)
            .filter(image_tag::Column::ImageId.is_in(image_ids.iter().copied()))
            .order_by_asc(image_tag::Column::ImageId)
            .order_by_asc(tag::Column::Name)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(link, tag_model)| tag_model.map(|t| (link.image_id, tag_from_model(t))))
            .collect())
    }

    async fn replace_image_tags(&self, image_id: i64, tag_ids: &[i64]) -> Result<()> {
        let txn = self.db.begin().await?;
        write_image_tags(&txn, image_id, tag_ids).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn list_tags_with_counts(&self) -> Result<Vec<TagWithCount>> {
        let sql = format!("{TAG_COUNT_SELECT} ORDER BY t.name ASC");
        let rows = TagCountRow::find_by_statement(Statement::from_string(DbBackend::Postgres, sql))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(TagWithCount::from).collect())
    }

    async fn popular_tags(&self, limit: u64) -> Result<Vec<TagWithCount>> {
        let sql = format!("{TAG_COUNT_SELECT} ORDER BY image_count DESC, t.name ASC LIMIT $1");
        let rows = TagCountRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [(limit as i64).into()],
        ))
        .all(&self.db)
        .await?;
        Ok(rows.into_iter().map(TagWithCount::from).collect())
    }

    async fn list_predefined_tags(&self) -> Result<Vec<Tag>> {
        let models = tag::Entity::find()
            .filter(tag::Column::IsPredefined.eq(true))
            .order_by_asc(tag::Column::Category)
            .order_by_asc(tag::Column::DisplayOrder)
            .order_by_asc(tag::Column::Name)
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(tag_from_model).collect())
    }

    async fn count_tags(&self) -> Result<i64> {
        Ok(tag::Entity::find().count(&self.db).await? as i64)
    }
}
