use std::time::Duration;

use axum::{Extension, Json, extract::State, response::IntoResponse};
use tracing::warn;

use porter_types::api::{Claims, SuggestTagsRequest, SuggestTagsResponse};

use crate::auth::AppState;
use crate::error::ApiError;

/// Cap mirrors the tag input widget on the client.
const MAX_TAGS: usize = 10;

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "in", "on", "at", "to", "for", "with", "is", "was", "it",
    "my", "near", "from", "this", "that",
];

/// Suggest tags for an item description via the remote text service,
/// degrading to the local tokenizer whenever the service is unreachable,
/// slow, or unconfigured. This endpoint never fails on collaborator errors.
pub async fn suggest_tags(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<SuggestTagsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let tags = match &state.tagger_url {
        Some(url) => match remote_tags(url, &req.text).await {
            Ok(tags) => tags,
            Err(e) => {
                warn!("tag service unavailable, using local tokenizer: {:#}", e);
                local_tags(&req.text)
            }
        },
        None => local_tags(&req.text),
    };

    Ok(Json(SuggestTagsResponse { tags }))
}

async fn remote_tags(url: &str, text: &str) -> anyhow::Result<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()?;

    let response: SuggestTagsResponse = client
        .post(url)
        .json(&serde_json::json!({ "text": text }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    anyhow::ensure!(!response.tags.is_empty(), "tag service returned no tags");

    let mut tags: Vec<String> = Vec::new();
    for tag in response.tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    Ok(tags)
}

/// Fallback tokenizer: lowercased alphanumeric words, stopwords removed,
/// deduped, first MAX_TAGS kept.
fn local_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric() && c != '-') {
        let word = word.trim_matches('-').to_lowercase();
        if word.len() < 2 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !tags.contains(&word) {
            tags.push(word);
        }
        if tags.len() == MAX_TAGS {
            break;
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_strips_stopwords_and_punctuation() {
        let tags = local_tags("Black umbrella left at the library, near block C!");
        assert_eq!(tags, vec!["black", "umbrella", "left", "library", "block"]);
    }

    #[test]
    fn tokenizer_dedupes_and_caps() {
        let text = "box box box one two three four five six seven eight nine ten eleven";
        let tags = local_tags(text);
        assert_eq!(tags.len(), MAX_TAGS);
        assert_eq!(tags.iter().filter(|t| *t == "box").count(), 1);
    }

    #[test]
    fn tokenizer_handles_empty_input() {
        assert!(local_tags("").is_empty());
        assert!(local_tags("    ").is_empty());
    }
}
