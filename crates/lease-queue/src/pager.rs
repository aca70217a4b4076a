//! Cursor-based pagination.
//!
//! A continuation token is `base64(json({last_key, fingerprint}))`. The
//! fingerprint is a SHA-256 digest of the filter parameters of the query that
//! produced it, so a token cannot be replayed against a differently filtered
//! listing. Page size and projection options are not part of the fingerprint.

use crate::config::MAX_LIST_PAGE_SIZE;
use crate::error::{QueueError, ValidationError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(test)]
#[path = "pager_tests.rs"]
mod tests;

/// Opaque resume token produced by a paged listing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContinuationToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "continuation".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Present only when more items remain
    pub continuation: Option<ContinuationToken>,
}

#[derive(Serialize, Deserialize)]
struct CursorState<K> {
    last_key: K,
    fingerprint: String,
}

/// Splits an ordered sequence into pages for one query shape
#[derive(Debug, Clone)]
pub struct Pager {
    page_size: usize,
    fingerprint: String,
}

impl Pager {
    /// Create a pager for a query filtered by `filter` (name/value pairs)
    pub fn new(filter: &[(&str, &str)], page_size: u32) -> Result<Self, ValidationError> {
        if page_size == 0 || page_size > MAX_LIST_PAGE_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "page_size".to_string(),
                message: format!("must be 1-{}, got {}", MAX_LIST_PAGE_SIZE, page_size),
            });
        }

        let mut hasher = Sha256::new();
        for (name, value) in filter {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }

        Ok(Self {
            page_size: page_size as usize,
            fingerprint: hex::encode(hasher.finalize()),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Decode `token` into the exclusive lower bound to resume after
    pub fn resume_after<K: DeserializeOwned>(
        &self,
        token: Option<&ContinuationToken>,
    ) -> Result<Option<K>, ValidationError> {
        let Some(token) = token else {
            return Ok(None);
        };

        let malformed = || ValidationError::InvalidFormat {
            field: "continuation".to_string(),
            message: "malformed continuation token".to_string(),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(token.as_str())
            .map_err(|_| malformed())?;
        let state: CursorState<K> = serde_json::from_slice(&bytes).map_err(|_| malformed())?;

        if state.fingerprint != self.fingerprint {
            return Err(ValidationError::InvalidFormat {
                field: "continuation".to_string(),
                message: "continuation token belongs to a different query".to_string(),
            });
        }

        Ok(Some(state.last_key))
    }

    /// Take one page from `items`, which must already start after the resume bound
    pub fn paginate<K, T, I>(&self, items: I) -> Result<Page<T>, ValidationError>
    where
        K: Serialize,
        I: IntoIterator<Item = (K, T)>,
    {
        let mut items = items.into_iter().peekable();
        let mut page = Vec::with_capacity(self.page_size.min(64));
        let mut last_key = None;

        while page.len() < self.page_size {
            let Some((key, item)) = items.next() else {
                break;
            };
            page.push(item);
            last_key = Some(key);
        }

        let continuation = match (last_key, items.peek().is_some()) {
            (Some(last_key), true) => Some(self.encode(last_key)?),
            _ => None,
        };

        Ok(Page {
            items: page,
            continuation,
        })
    }

    fn encode<K: Serialize>(&self, last_key: K) -> Result<ContinuationToken, ValidationError> {
        let state = CursorState {
            last_key,
            fingerprint: self.fingerprint.clone(),
        };
        let json = serde_json::to_vec(&state).map_err(|e| ValidationError::InvalidFormat {
            field: "continuation".to_string(),
            message: e.to_string(),
        })?;

        Ok(ContinuationToken(URL_SAFE_NO_PAD.encode(json)))
    }
}

/// Lazy sequence of pages, fetched one at a time
///
/// Ends after the first page without a continuation, or after the first error.
pub struct Pages<T, F>
where
    F: FnMut(Option<&ContinuationToken>) -> Result<Page<T>, QueueError>,
{
    fetch: F,
    next: Option<Option<ContinuationToken>>,
}

impl<T, F> Pages<T, F>
where
    F: FnMut(Option<&ContinuationToken>) -> Result<Page<T>, QueueError>,
{
    /// Start at `start`, or at the beginning when `None`
    pub fn new(start: Option<ContinuationToken>, fetch: F) -> Self {
        Self {
            fetch,
            next: Some(start),
        }
    }
}

impl<T, F> Iterator for Pages<T, F>
where
    F: FnMut(Option<&ContinuationToken>) -> Result<Page<T>, QueueError>,
{
    type Item = Result<Page<T>, QueueError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cursor = self.next.take()?;

        match (self.fetch)(cursor.as_ref()) {
            Ok(page) => {
                self.next = page.continuation.clone().map(Some);
                Some(Ok(page))
            }
            Err(err) => Some(Err(err)),
        }
    }
}
