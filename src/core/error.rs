//! Error types for valhalla-layers
//!
//! The HTTP taxonomy mirrors what a Valhalla deployment can answer with, plus
//! the input-side failures raised while extracting locations from feature sources.

use std::fmt;

use strsim::{jaro_winkler, normalized_levenshtein};

/// Minimum combined similarity for a "Did you mean" suggestion
const SUGGESTION_THRESHOLD: f64 = 0.7;

/// Suggest the closest candidate for a misspelled name
///
/// Scores are 70% Jaro-Winkler plus 30% normalized Levenshtein. An exact
/// (case-insensitive) match returns `None` since there is nothing to correct.
pub fn suggest_correction(input: &str, candidates: &[&str]) -> Option<String> {
    let input_lower = input.to_lowercase();
    let mut best_match = None;
    let mut best_score = 0.0f64;

    for candidate in candidates {
        let candidate_lower = candidate.to_lowercase();
        if candidate_lower == input_lower {
            return None;
        }

        let score = jaro_winkler(&input_lower, &candidate_lower) * 0.7
            + normalized_levenshtein(&input_lower, &candidate_lower) * 0.3;

        if score >= SUGGESTION_THRESHOLD && score > best_score {
            best_score = score;
            best_match = Some(candidate.to_string());
        }
    }

    best_match
}

/// Build an `InvalidInput` error for an unknown name, with a suggestion when one is close
pub fn unknown_name(what: &str, input: &str, candidates: &[&str]) -> Error {
    match suggest_correction(input, candidates) {
        Some(suggestion) => Error::InvalidInput(format!(
            "unknown {what} '{input}'. Did you mean '{suggestion}'?"
        )),
        None => Error::InvalidInput(format!(
            "unknown {what} '{input}'. Valid values: {}",
            candidates.join(", ")
        )),
    }
}

/// Main error type for valhalla-layers operations
#[derive(Debug)]
pub enum Error {
    /// Retry budget exhausted or transport-level timeout
    Timeout(String),

    /// HTTP 429, only surfaced when it cannot be retried
    OverQueryLimit { status: String, message: Option<String> },

    /// HTTP 401
    InvalidKey { status: String, message: Option<String> },

    /// HTTP 4xx (other than 401/429), or an `error` member in a 200 body
    ApiError {
        status: String,
        message: Option<String>,
        feature_id: Option<String>,
    },

    /// Anything else, including refused connections and unknown hosts
    GenericServerError { status: String, message: Option<String> },

    /// Geometry type not accepted for the requested extraction
    InvalidGeometry(String),

    /// Layer type not accepted by the endpoint (e.g. MultiPoint sources)
    UnsupportedLayer(String),

    /// Invalid configuration or parameters
    InvalidInput(String),

    /// Malformed JSON in a request, response or input file
    Json(serde_json::Error),

    /// File I/O error
    IoError(std::io::Error),
}

fn status_message(f: &mut fmt::Formatter<'_>, status: &str, message: &Option<String>) -> fmt::Result {
    match message {
        Some(message) => write!(f, "{status} ({message})"),
        None => write!(f, "{status}"),
    }
}

impl Error {
    /// Class name shown next to the message when an error reaches the user
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Timeout(_) => "Timeout",
            Error::OverQueryLimit { .. } => "OverQueryLimit",
            Error::InvalidKey { .. } => "InvalidKey",
            Error::ApiError { .. } => "ApiError",
            Error::GenericServerError { .. } => "GenericServerError",
            Error::InvalidGeometry(_) => "ValueError",
            Error::UnsupportedLayer(_) => "TypeError",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Json(_) => "JSONDecodeError",
            Error::IoError(_) => "IOError",
        }
    }

    /// Whether this error stops a whole batch instead of a single unit of work
    pub fn aborts_batch(&self) -> bool {
        !matches!(self, Error::ApiError { .. })
    }

    /// Attach the id of the request that caused an `ApiError`
    pub fn with_feature_id(self, id: Option<String>) -> Self {
        match self {
            Error::ApiError { status, message, feature_id } => Error::ApiError {
                status,
                message,
                feature_id: feature_id.or(id),
            },
            other => other,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout(msg) => write!(f, "{msg}"),
            Error::OverQueryLimit { status, message }
            | Error::InvalidKey { status, message }
            | Error::GenericServerError { status, message } => status_message(f, status, message),
            Error::ApiError { status, message, .. } => status_message(f, status, message),
            Error::InvalidGeometry(msg) => write!(f, "{msg}"),
            Error::UnsupportedLayer(msg) => write!(f, "{msg}"),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            Error::Json(err) => write!(f, "JSON error: {err}"),
            Error::IoError(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout("Request timed out.".to_string())
        } else if err.is_decode() {
            Error::GenericServerError {
                status: err.status().map(|s| s.as_u16().to_string()).unwrap_or_default(),
                message: Some(format!("Invalid response body: {err}")),
            }
        } else {
            Error::GenericServerError {
                status: "1".to_string(),
                message: Some(err.to_string()),
            }
        }
    }
}

/// Convenience result type for valhalla-layers operations
pub type Result<T> = std::result::Result<T, Error>;
