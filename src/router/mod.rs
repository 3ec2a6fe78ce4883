//! Request Router
//!
//! Parses incoming request lines into [`Route`]s. Path segments and query
//! values are percent-decoded; query values additionally treat `+` as a space.

use crate::upload::ChunkUpload;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use thiserror::Error;

/// Router errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouterError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Supported operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// GET /health
    Health,
    /// GET / or GET /files
    ListFiles,
    /// POST /upload?filename=..&chunkIndex=..&totalChunks=..
    Upload(ChunkUpload),
    /// GET /download/{name}
    Download { file_name: String },
    /// GET /preview/{name}
    Preview { file_name: String },
    /// DELETE /delete/{name}
    Delete { file_name: String },
}

/// Request parser
pub struct RequestParser;

impl RequestParser {
    /// Parse a request line into a route
    pub fn parse(method: &str, path: &str, query: Option<&str>) -> Result<Route, RouterError> {
        let trimmed = path.trim_start_matches('/');
        let (head, rest) = match trimmed.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (trimmed, None),
        };

        match (head, rest) {
            ("", None) | ("files", None) => Self::expect(method, "GET", Route::ListFiles),
            ("health", None) => Self::expect(method, "GET", Route::Health),
            ("upload", None) => {
                if method != "POST" {
                    return Err(RouterError::MethodNotAllowed(format!(
                        "{} /upload",
                        method
                    )));
                }
                let params = Self::parse_query(query);
                let chunk = ChunkUpload::from_params(
                    params.get("filename").map(String::as_str),
                    params.get("chunkIndex").map(String::as_str),
                    params.get("totalChunks").map(String::as_str),
                )
                .map_err(|e| RouterError::BadRequest(e.to_string()))?;
                Ok(Route::Upload(chunk))
            }
            ("download", Some(name)) => {
                let file_name = Self::decode_name(name)?;
                Self::expect(method, "GET", Route::Download { file_name })
            }
            ("preview", Some(name)) => {
                let file_name = Self::decode_name(name)?;
                Self::expect(method, "GET", Route::Preview { file_name })
            }
            ("delete", Some(name)) => {
                let file_name = Self::decode_name(name)?;
                Self::expect(method, "DELETE", Route::Delete { file_name })
            }
            _ => Err(RouterError::NotFound(path.to_string())),
        }
    }

    fn expect(method: &str, allowed: &str, route: Route) -> Result<Route, RouterError> {
        if method == allowed {
            Ok(route)
        } else {
            Err(RouterError::MethodNotAllowed(format!(
                "{} not allowed, expected {}",
                method, allowed
            )))
        }
    }

    fn decode_name(raw: &str) -> Result<String, RouterError> {
        if raw.is_empty() {
            return Err(RouterError::InvalidPath("Missing file name".into()));
        }
        percent_decode_str(raw)
            .decode_utf8()
            .map(|name| name.into_owned())
            .map_err(|_| RouterError::InvalidPath("File name is not valid UTF-8".into()))
    }

    fn parse_query(query: Option<&str>) -> HashMap<String, String> {
        let mut params = HashMap::new();
        if let Some(q) = query {
            for pair in q.split('&').filter(|pair| !pair.is_empty()) {
                let mut kv = pair.splitn(2, '=');
                if let Some(key) = kv.next() {
                    let value = kv.next().unwrap_or("");
                    params.insert(Self::decode_query(key), Self::decode_query(value));
                }
            }
        }
        params
    }

    fn decode_query(raw: &str) -> String {
        let spaced = raw.replace('+', " ");
        percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upload() {
        let route = RequestParser::parse(
            "POST",
            "/upload",
            Some("filename=report.pdf&chunkIndex=2&totalChunks=3"),
        )
        .unwrap();
        assert_eq!(
            route,
            Route::Upload(ChunkUpload::new("report.pdf", 2, 3).unwrap())
        );
    }

    #[test]
    fn test_parse_upload_decodes_name() {
        let route = RequestParser::parse(
            "POST",
            "/upload",
            Some("filename=my+holiday%20photo.jpg&chunkIndex=0&totalChunks=1"),
        )
        .unwrap();
        match route {
            Route::Upload(chunk) => assert_eq!(chunk.file_name, "my holiday photo.jpg"),
            other => panic!("Expected upload, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_upload_rejects_bad_params() {
        let result = RequestParser::parse("POST", "/upload", Some("filename=a&chunkIndex=5&totalChunks=2"));
        assert!(matches!(result, Err(RouterError::BadRequest(_))));

        let result = RequestParser::parse("POST", "/upload", None);
        assert!(matches!(result, Err(RouterError::BadRequest(_))));
    }

    #[test]
    fn test_parse_download_and_delete() {
        assert_eq!(
            RequestParser::parse("GET", "/download/a%20b.txt", None).unwrap(),
            Route::Download {
                file_name: "a b.txt".into()
            }
        );
        assert_eq!(
            RequestParser::parse("DELETE", "/delete/a.txt", None).unwrap(),
            Route::Delete {
                file_name: "a.txt".into()
            }
        );
    }

    #[test]
    fn test_parse_list_and_health() {
        assert_eq!(RequestParser::parse("GET", "/", None).unwrap(), Route::ListFiles);
        assert_eq!(RequestParser::parse("GET", "/files", None).unwrap(), Route::ListFiles);
        assert_eq!(RequestParser::parse("GET", "/health", None).unwrap(), Route::Health);
    }

    #[test]
    fn test_wrong_method_rejected() {
        assert!(matches!(
            RequestParser::parse("GET", "/upload", None),
            Err(RouterError::MethodNotAllowed(_))
        ));
        assert!(matches!(
            RequestParser::parse("GET", "/delete/a.txt", None),
            Err(RouterError::MethodNotAllowed(_))
        ));
    }

    #[test]
    fn test_unknown_path() {
        assert!(matches!(
            RequestParser::parse("GET", "/nope", None),
            Err(RouterError::NotFound(_))
        ));
        assert!(matches!(
            RequestParser::parse("GET", "/download/", None),
            Err(RouterError::InvalidPath(_))
        ));
    }
}
