//! Request parameter parsing

use actix_web::http::header;
use actix_web::HttpRequest;
use serde::Deserialize;

use featureserver_common::error::{Error, Result};
use featureserver_dbase::QuerySpec;

/// Default CSV separator
pub const DEFAULT_SEPARATOR: char = '|';

/// Response body format, chosen from the `Accept` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
}

impl OutputFormat {
    pub fn from_request(req: &HttpRequest) -> Self {
        let wants_csv = req
            .headers()
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|accept| accept.contains("text/csv"));
        if wants_csv {
            Self::Csv
        } else {
            Self::Json
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    /// Extension of the downloaded file
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "js",
            Self::Csv => "csv",
        }
    }
}

/// Raw query string of `GET /rest/tables/{name}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReadParams {
    pub bbox: Option<String>,
    pub cql: Option<String>,
    pub start: Option<String>,
    pub limit: Option<String>,
    #[serde(rename = "sortColumns")]
    pub sort_columns: Option<String>,
    #[serde(rename = "sortDirections")]
    pub sort_directions: Option<String>,
    #[serde(rename = "visibleColumns")]
    pub visible_columns: Option<String>,
    pub separator: Option<String>,
    pub asdownload: Option<String>,
}

impl ReadParams {
    pub fn to_spec(&self) -> Result<QuerySpec> {
        Ok(QuerySpec {
            bbox: non_blank(self.bbox.as_deref()).map(str::to_string),
            predicate: non_blank(self.cql.as_deref()).map(str::to_string),
            start: parse_count("start", self.start.as_deref())?,
            limit: parse_count("limit", self.limit.as_deref())?,
            sort_columns: non_blank(self.sort_columns.as_deref())
                .map(split_list)
                .unwrap_or_default(),
            sort_directions: non_blank(self.sort_directions.as_deref()).map(split_list),
            visible_columns: non_blank(self.visible_columns.as_deref()).map(split_list),
        })
    }

    pub fn separator(&self) -> char {
        separator(self.separator.as_deref())
    }

    pub fn as_download(&self) -> bool {
        as_download(self.asdownload.as_deref())
    }
}

/// Raw query string of `GET /rest/tables/{name}/{property}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DistinctParams {
    pub separator: Option<String>,
    pub asdownload: Option<String>,
}

impl DistinctParams {
    pub fn separator(&self) -> char {
        separator(self.separator.as_deref())
    }

    pub fn as_download(&self) -> bool {
        as_download(self.asdownload.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Split a `;`-separated list, keeping empty entries so co-indexed lists stay aligned
pub fn split_list(value: &str) -> Vec<String> {
    value.split(';').map(|s| s.trim().to_string()).collect()
}

fn parse_count(name: &str, value: Option<&str>) -> Result<Option<u64>> {
    match non_blank(value) {
        None => Ok(None),
        Some(text) => text.trim().parse::<u64>().map(Some).map_err(|_| {
            Error::InvalidQueryParam(format!(
                "{name} must be a non-negative integer, got \"{text}\""
            ))
        }),
    }
}

/// First character of the parameter, or the default separator
pub fn separator(value: Option<&str>) -> char {
    value
        .and_then(|v| v.chars().next())
        .unwrap_or(DEFAULT_SEPARATOR)
}

pub fn as_download(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_spec_from_params() {
        let params = ReadParams {
            bbox: Some("1,2,3,4".to_string()),
            cql: Some("name = 'x'".to_string()),
            start: Some("2".to_string()),
            limit: Some(" 3 ".to_string()),
            sort_columns: Some("name;area".to_string()),
            sort_directions: Some("asc; desc".to_string()),
            visible_columns: Some("name".to_string()),
            ..Default::default()
        };
        let spec = params.to_spec().unwrap();
        assert_eq!(spec.bbox.as_deref(), Some("1,2,3,4"));
        assert_eq!(spec.predicate.as_deref(), Some("name = 'x'"));
        assert_eq!(spec.start, Some(2));
        assert_eq!(spec.limit, Some(3));
        assert_eq!(spec.sort_columns, vec!["name", "area"]);
        assert_eq!(spec.sort_directions, Some(vec!["asc".to_string(), "desc".to_string()]));
        assert_eq!(spec.visible_columns, Some(vec!["name".to_string()]));
    }

    #[test]
    fn test_blank_params_are_absent() {
        let params = ReadParams {
            cql: Some("  ".to_string()),
            start: Some(String::new()),
            visible_columns: Some(String::new()),
            ..Default::default()
        };
        let spec = params.to_spec().unwrap();
        assert!(spec.predicate.is_none());
        assert!(spec.start.is_none());
        assert!(spec.visible_columns.is_none());
        assert!(spec.sort_columns.is_empty());
    }

    #[test]
    fn test_bad_numbers_rejected() {
        for (start, limit) in [("abc", "1"), ("-1", "1"), ("0", "1.5")] {
            let params = ReadParams {
                start: Some(start.to_string()),
                limit: Some(limit.to_string()),
                ..Default::default()
            };
            let err = params.to_spec().unwrap_err();
            assert!(matches!(err, Error::InvalidQueryParam(_)));
            assert_eq!(err.status_code(), 400);
        }
    }

    #[test]
    fn test_split_keeps_alignment() {
        assert_eq!(split_list("a;;b"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_separator_and_download() {
        assert_eq!(separator(None), '|');
        assert_eq!(separator(Some("")), '|');
        assert_eq!(separator(Some(";,")), ';');
        assert!(as_download(Some("TRUE")));
        assert!(!as_download(Some("yes")));
        assert!(!as_download(None));
    }

    #[test]
    fn test_output_format() {
        let req = TestRequest::default()
            .insert_header((header::ACCEPT, "text/csv, */*"))
            .to_http_request();
        assert_eq!(OutputFormat::from_request(&req), OutputFormat::Csv);

        let req = TestRequest::default().to_http_request();
        assert_eq!(OutputFormat::from_request(&req), OutputFormat::Json);
        assert_eq!(OutputFormat::Json.extension(), "js");
    }
}
