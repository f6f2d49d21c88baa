//! # Catalog Queries
//!
//! Builders for the media server's listing endpoints. Each builder returns a
//! [`Query`]; listings meant to be walked page by page are handed to a
//! [`PaginatedFetcher`](crate::paginate::PaginatedFetcher), one-shot lookups
//! go straight to an [`ApiTransport`].
//!
//! `{UserId}` placeholders are left in endpoints and parameters; the
//! transport substitutes the configured user.

use serde_json::Value;
use tracing::{debug, warn};

use crate::query::{ItemsResponse, Query, LIMIT};
use crate::transport::ApiTransport;

/// Per-user item listing.
pub const ITEMS_ENDPOINT: &str = "Users/{UserId}/Items";

/// Artist listing.
pub const ARTISTS_ENDPOINT: &str = "Artists";

/// Endpoint resolving a single identifier into its full record.
pub fn item_endpoint(item_id: &str) -> String {
    format!("{}/{}", ITEMS_ENDPOINT, item_id)
}

/// Absolute URL of an API handler on a server.
///
/// A leading `/` on the handler is tolerated but logged, since it usually
/// means the caller built the path by hand.
pub fn server_url(base: &str, handler: &str) -> String {
    let handler = match handler.strip_prefix('/') {
        Some(stripped) => {
            warn!(handler = stripped, "Handler starts with /");
            stripped
        }
        None => handler,
    };

    format!("{}/emby/{}", base.trim_end_matches('/'), handler)
}

/// Fields needed to track items without hydrating them.
pub fn basic_info() -> &'static str {
    "Etag,PresentationUniqueKey"
}

/// Fields for a full video or library record.
pub fn full_info() -> &'static str {
    "Path,Genres,SortName,Studios,Writer,Taglines,LocalTrailerCount,\
     OfficialRating,CumulativeRunTimeTicks,ItemCounts,PremiereDate,ProductionYear,\
     Metascore,AirTime,DateCreated,People,Overview,CommunityRating,StartDate,\
     CriticRating,Etag,ShortOverview,ProductionLocations,Tags,ProviderIds,ParentId,\
     RemoteTrailers,SpecialEpisodeNumbers,Status,EndDate,MediaSources,VoteCount,\
     RecursiveItemCount,PrimaryImageAspectRatio,DisplayOrder,PresentationUniqueKey,\
     OriginalTitle"
}

/// Fields for artists, albums and songs.
pub fn music_info() -> &'static str {
    "Etag,Genres,SortName,Studios,Writer,PremiereDate,ProductionYear,OfficialRating,\
     CumulativeRunTimeTicks,Metascore,CommunityRating,AirTime,DateCreated,\
     MediaStreams,People,ProviderIds,Overview,ItemCounts"
}

/// Fields for browsing listings.
pub fn browse_info() -> &'static str {
    "DateCreated,EpisodeCount,SeasonCount,Path,Genres,Studios,Taglines,MediaStreams,\
     Overview,Etag,ProductionLocations,Width,Height,RecursiveItemCount,ChildCount"
}

fn optional(value: Option<&str>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// Items under a parent, optionally restricted to one type.
pub fn items(parent_id: Option<&str>, item_type: Option<&str>, basic: bool) -> Query {
    Query::new(ITEMS_ENDPOINT)
        .param("ParentId", optional(parent_id))
        .param("IncludeItemTypes", optional(item_type))
        .param("SortBy", "SortName")
        .param("SortOrder", "Ascending")
        .param("Fields", if basic { basic_info() } else { full_info() })
}

/// Artists, optionally under a library.
pub fn artists(parent_id: Option<&str>, basic: bool) -> Query {
    Query::new(ARTISTS_ENDPOINT)
        .param("UserId", "{UserId}")
        .param("ParentId", optional(parent_id))
        .param("SortBy", "SortName")
        .param("SortOrder", "Ascending")
        .param("Fields", if basic { basic_info() } else { music_info() })
}

/// Albums credited to an artist, oldest additions first.
pub fn albums_by_artist(artist_id: &str, basic: bool) -> Query {
    items(None, Some("MusicAlbum"), basic)
        .param("SortBy", "DateCreated")
        .param("ArtistIds", artist_id)
}

pub fn movies_by_boxset(boxset_id: &str) -> Query {
    items(Some(boxset_id), Some("Movie"), false)
}

pub fn episodes_by_show(show_id: &str) -> Query {
    items(Some(show_id), Some("Episode"), false)
}

/// First item of a type under a parent.
pub fn single_item(parent_id: &str, media: &str) -> Query {
    Query::new(ITEMS_ENDPOINT)
        .param("ParentId", parent_id)
        .param("Recursive", true)
        .param(LIMIT, 1)
        .param("IncludeItemTypes", media)
}

/// Dynamic listing used for browsing a section of a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredSection {
    pub parent_id: String,
    pub media: Option<String>,
    pub limit: Option<u32>,
    pub recursive: Option<bool>,
    pub sort: Option<String>,
    pub sort_order: Option<String>,
    pub filters: Option<String>,
    /// Ask for cast and crew as well
    pub include_people: bool,
    /// Show box sets as single entries instead of their movies.
    ///
    /// Sent as `CollapseBoxSetItems` with the same value. Settings that store
    /// "show box set contents" carry the opposite flag and must be negated.
    pub group_box_sets: bool,
}

impl FilteredSection {
    pub fn new(parent_id: impl Into<String>) -> Self {
        Self {
            parent_id: parent_id.into(),
            media: None,
            limit: None,
            recursive: None,
            sort: None,
            sort_order: None,
            filters: None,
            include_people: false,
            group_box_sets: false,
        }
    }

    pub fn media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = Some(recursive);
        self
    }

    pub fn sort(mut self, sort: impl Into<String>, order: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self.sort_order = Some(order.into());
        self
    }

    pub fn filters(mut self, filters: impl Into<String>) -> Self {
        self.filters = Some(filters.into());
        self
    }

    pub fn include_people(mut self, include: bool) -> Self {
        self.include_people = include;
        self
    }

    pub fn group_box_sets(mut self, group: bool) -> Self {
        self.group_box_sets = group;
        self
    }
}

/// Query for a [`FilteredSection`].
pub fn filtered_section(section: &FilteredSection) -> Query {
    let mut fields = browse_info().to_string();
    if section.include_people {
        fields.push_str(",People");
    }
    if section
        .media
        .as_deref()
        .is_some_and(|media| media.contains("Photo"))
    {
        fields.push_str(",Width,Height");
    }

    Query::new(ITEMS_ENDPOINT)
        .param("ParentId", section.parent_id.as_str())
        .param("IncludeItemTypes", optional(section.media.as_deref()))
        .param("IsMissing", false)
        .param("Recursive", section.recursive.unwrap_or(true))
        .param(LIMIT, section.limit.map(Value::from).unwrap_or(Value::Null))
        .param("SortBy", section.sort.as_deref().unwrap_or("SortName"))
        .param(
            "SortOrder",
            section.sort_order.as_deref().unwrap_or("Ascending"),
        )
        .param("Filters", optional(section.filters.as_deref()))
        .param("ImageTypeLimit", 1)
        .param("IsVirtualUnaired", false)
        .param("CollapseBoxSetItems", section.group_box_sets)
        .param("Fields", fields)
}

/// Whether an item belongs to a library view.
///
/// Grouped libraries surface items from other views; this asks the server
/// whether `item_id` is really reachable under `library_id`. Any failure
/// counts as "no".
pub async fn validate_view(transport: &dyn ApiTransport, library_id: &str, item_id: &str) -> bool {
    let query = Query::new(ITEMS_ENDPOINT)
        .param("ParentId", library_id)
        .param("Recursive", true)
        .param("Ids", item_id);

    let body = match transport.get(&query.endpoint, &query.params).await {
        Ok(body) => body,
        Err(e) => {
            debug!(library_id, item_id, error = %e, "View validation failed");
            return false;
        }
    };

    serde_json::from_value::<ItemsResponse>(body)
        .map(|response| !response.items.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SyncError};
    use crate::query::Params;
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedTransport(std::result::Result<Value, u16>);

    #[async_trait]
    impl ApiTransport for FixedTransport {
        async fn get(&self, _endpoint: &str, _params: &Params) -> Result<Value> {
            match &self.0 {
                Ok(body) => Ok(body.clone()),
                Err(status) => Err(SyncError::Http {
                    status: *status,
                    message: "error".to_string(),
                }),
            }
        }
    }

    #[test]
    fn test_server_url_strips_leading_slash() {
        assert_eq!(
            server_url("http://host:8096", "/Users/{UserId}/Items"),
            "http://host:8096/emby/Users/{UserId}/Items"
        );
        assert_eq!(
            server_url("http://host:8096/", "System/Info"),
            "http://host:8096/emby/System/Info"
        );
    }

    #[test]
    fn test_items_query_uses_field_selector() {
        let basic = items(Some("lib1"), Some("Movie"), true);
        assert_eq!(basic.endpoint, ITEMS_ENDPOINT);
        assert_eq!(basic.get("Fields"), Some(&json!(basic_info())));
        assert_eq!(basic.get("ParentId"), Some(&json!("lib1")));

        let full = items(None, None, false);
        assert_eq!(full.get("Fields"), Some(&json!(full_info())));
        assert_eq!(full.get("ParentId"), Some(&Value::Null));
    }

    #[test]
    fn test_albums_by_artist_sorts_by_date() {
        let query = albums_by_artist("artist9", true);
        assert_eq!(query.get("SortBy"), Some(&json!("DateCreated")));
        assert_eq!(query.get("ArtistIds"), Some(&json!("artist9")));
        assert_eq!(query.get("IncludeItemTypes"), Some(&json!("MusicAlbum")));
    }

    #[test]
    fn test_artists_query_carries_user_placeholder() {
        let query = artists(None, false);
        assert_eq!(query.endpoint, ARTISTS_ENDPOINT);
        assert_eq!(query.get("UserId"), Some(&json!("{UserId}")));
        assert_eq!(query.get("Fields"), Some(&json!(music_info())));
    }

    #[test]
    fn test_boxset_and_show_children() {
        assert_eq!(
            movies_by_boxset("set1").get("IncludeItemTypes"),
            Some(&json!("Movie"))
        );
        assert_eq!(
            episodes_by_show("show1").get("ParentId"),
            Some(&json!("show1"))
        );
    }

    #[test]
    fn test_filtered_section_defaults_and_extras() {
        let section = FilteredSection::new("lib1")
            .media("Photo")
            .include_people(true)
            .limit(25);
        let query = filtered_section(&section);

        assert_eq!(query.get("SortBy"), Some(&json!("SortName")));
        assert_eq!(query.get("SortOrder"), Some(&json!("Ascending")));
        assert_eq!(query.get("Recursive"), Some(&json!(true)));
        assert_eq!(query.get("Limit"), Some(&json!(25)));
        assert_eq!(query.get("CollapseBoxSetItems"), Some(&json!(false)));

        let fields = query.get("Fields").and_then(Value::as_str).unwrap();
        assert!(fields.ends_with(",People,Width,Height"));
    }

    #[test]
    fn test_grouped_box_sets_collapse() {
        let query = filtered_section(&FilteredSection::new("lib1").group_box_sets(true));
        assert_eq!(query.get("CollapseBoxSetItems"), Some(&json!(true)));
    }

    #[test]
    fn test_single_item_limits_to_one() {
        let query = single_item("lib1", "Episode");
        assert_eq!(query.get("Limit"), Some(&json!(1)));
        assert_eq!(query.get("IncludeItemTypes"), Some(&json!("Episode")));
    }

    #[tokio::test]
    async fn test_validate_view() {
        let hit = FixedTransport(Ok(json!({ "Items": [{ "Id": "i1" }] })));
        assert!(validate_view(&hit, "lib1", "i1").await);

        let miss = FixedTransport(Ok(json!({ "Items": [] })));
        assert!(!validate_view(&miss, "lib1", "i1").await);

        let failing = FixedTransport(Err(404));
        assert!(!validate_view(&failing, "lib1", "i1").await);
    }
}
