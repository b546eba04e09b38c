use crate::error::{CatalogError, Result};
use crate::models::{
    is_supported_content_type, normalize_tag_names, CreateImageRequest, Image, Metadata,
    UpdateImageRequest, MAX_DIMENSION, MAX_FILENAME_LEN, MAX_FILE_SIZE,
};

/// Business rules applied before the listing service touches storage or the database.
pub trait Validator: Send + Sync {
    fn validate_upload(&self, request: &CreateImageRequest) -> Result<()>;

    fn validate_update(&self, id: i64, request: &UpdateImageRequest) -> Result<()>;

    fn validate_deletion(&self, id: i64) -> Result<()>;

    /// Checks a fully assembled entity, e.g. after its tag set was replaced.
    fn validate_image(&self, image: &Image) -> Result<()> {
        validate_image(image)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate_upload(&self, request: &CreateImageRequest) -> Result<()> {
        validate_original_filename(&request.original_filename)?;
        validate_content_type(&request.content_type)?;
        validate_file_size(request.file_size)?;
        validate_dimension("width", request.width)?;
        validate_dimension("height", request.height)?;
        normalize_tag_names(&request.tags)?;
        if let Some(text) = request.metadata.as_deref() {
            Metadata::parse(text)?;
        }
        Ok(())
    }

    fn validate_update(&self, id: i64, request: &UpdateImageRequest) -> Result<()> {
        validate_id(id)?;
        normalize_tag_names(&request.tags)?;
        Ok(())
    }

    fn validate_deletion(&self, id: i64) -> Result<()> {
        validate_id(id)
    }
}

pub fn validate_image(image: &Image) -> Result<()> {
    validate_original_filename(&image.original_filename)?;
    validate_content_type(&image.content_type)?;
    validate_file_size(image.file_size)?;
    validate_dimension("width", image.width)?;
    validate_dimension("height", image.height)?;
    let names: Vec<String> = image.tags.iter().map(|t| t.name.clone()).collect();
    normalize_tag_names(&names)?;
    Ok(())
}

fn validate_id(id: i64) -> Result<()> {
    if id <= 0 {
        return Err(CatalogError::validation(format!("invalid image id {id}")));
    }
    Ok(())
}

fn validate_original_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CatalogError::validation("original filename must not be empty"));
    }
    if name.chars().count() > MAX_FILENAME_LEN {
        return Err(CatalogError::validation(format!(
            "original filename exceeds {MAX_FILENAME_LEN} characters"
        )));
    }
    if name.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(CatalogError::validation(
            "original filename must not contain control characters or path separators",
        ));
    }
    Ok(())
}

fn validate_content_type(content_type: &str) -> Result<()> {
    if !is_supported_content_type(content_type) {
        return Err(CatalogError::validation(format!(
            "unsupported content type '{content_type}'"
        )));
    }
    Ok(())
}

fn validate_file_size(size: i64) -> Result<()> {
    if size <= 0 || size > MAX_FILE_SIZE {
        return Err(CatalogError::validation(format!(
            "file size must be between 1 and {MAX_FILE_SIZE} bytes, got {size}"
        )));
    }
    Ok(())
}

fn validate_dimension(field: &str, value: Option<i32>) -> Result<()> {
    match value {
        Some(v) if !(1..=MAX_DIMENSION).contains(&v) => Err(CatalogError::validation(format!(
            "{field} must be between 1 and {MAX_DIMENSION}, got {v}"
        ))),
        _ => Ok(()),
    }
}
