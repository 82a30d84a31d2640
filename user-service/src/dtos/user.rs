use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::models::UserProfile;
use crate::utils::empty_string_as_none;

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9\s\-]{7,15}$").expect("phone pattern is valid"));

static ZIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9\- ]{3,10}$").expect("zip pattern is valid"));

/// Profile fields supplied at registration.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    #[validate(length(min = 1, max = 50, message = "First name must be between 1 and 50 characters"))]
    #[schema(example = "Ada")]
    pub first_name: String,

    #[validate(length(min = 1, max = 50, message = "Last name must be between 1 and 50 characters"))]
    #[schema(example = "Lovelace")]
    pub last_name: String,

    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "ada@example.com")]
    pub email: String,

    #[serde(default, deserialize_with = "empty_string_as_none")]
    #[validate(regex(path = *PHONE_RE, message = "Invalid phone number format"))]
    #[schema(example = "+44 20 7946 0958")]
    pub phone_number: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_none")]
    #[validate(regex(path = *ZIP_RE, message = "Invalid zip code format"))]
    #[schema(example = "SW1A 1AA")]
    pub zip_code: Option<String>,
}

/// Editable profile fields. Email is immutable once registered.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserDto {
    #[validate(length(min = 1, max = 50, message = "First name must be between 1 and 50 characters"))]
    #[schema(example = "Ada")]
    pub first_name: String,

    #[validate(length(min = 1, max = 50, message = "Last name must be between 1 and 50 characters"))]
    #[schema(example = "King")]
    pub last_name: String,

    #[serde(default, deserialize_with = "empty_string_as_none")]
    #[validate(regex(path = *PHONE_RE, message = "Invalid phone number format"))]
    pub phone_number: Option<String>,

    #[serde(default, deserialize_with = "empty_string_as_none")]
    #[validate(regex(path = *ZIP_RE, message = "Invalid zip code format"))]
    pub zip_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadUserDto {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub zip_code: Option<String>,
}

impl From<UserProfile> for ReadUserDto {
    fn from(profile: UserProfile) -> Self {
        Self {
            id: profile.id,
            first_name: profile.first_name,
            last_name: profile.last_name,
            email: profile.email,
            phone_number: profile.phone_number,
            zip_code: profile.zip_code,
        }
    }
}

fn default_page_index() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    /// 1-based page number
    #[serde(default = "default_page_index")]
    #[param(example = 1, minimum = 1)]
    pub page_index: u32,

    #[serde(default = "default_page_size")]
    #[param(example = 10, minimum = 1, maximum = 100)]
    pub page_size: u32,
}

/// One page of a larger result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page_index: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

impl<T> PagedResult<T> {
    pub fn new(items: Vec<T>, total_count: u64, page_index: u32, page_size: u32) -> Self {
        let total_pages = if page_size == 0 {
            0
        } else {
            total_count.div_ceil(u64::from(page_size))
        };

        Self {
            items,
            total_count,
            page_index,
            page_size,
            total_pages,
            has_previous_page: page_index > 1,
            has_next_page: u64::from(page_index) < total_pages,
        }
    }
}
