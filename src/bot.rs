//! Bot-identity classification (§4.5): `is_bot(author)` and branch-prefix
//! matching, both cheap pure predicates consulted (and cached) by the
//! orchestrator and the PR processor.

use crate::cache::{Cache, NS_IDENTITY_IS_BOT};
use crate::config::{BotConfig, BranchConfig};

/// Whether `author` matches one of the configured bot identity patterns:
/// an exact match, or any pattern ending in `[bot]` matched as a suffix.
pub fn is_bot(config: &BotConfig, author: &str) -> bool {
    config.identities.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix("[bot]") {
            author == pattern || (author.ends_with("[bot]") && author.starts_with(prefix))
        } else {
            author == pattern
        }
    })
}

/// Cached variant of `is_bot`, namespaced per §4.2.
pub fn is_bot_cached(cache: &Cache, config: &BotConfig, author: &str) -> bool {
    if let Some(cached) = cache.get::<bool>(NS_IDENTITY_IS_BOT, author) {
        return cached;
    }
    let verdict = is_bot(config, author);
    cache.put(NS_IDENTITY_IS_BOT, author, verdict, None);
    verdict
}

/// Whether `head_ref` matches any configured bot branch prefix.
pub fn is_bot_branch(config: &BranchConfig, head_ref: &str) -> bool {
    config.prefix.iter().any(|prefix| head_ref.starts_with(prefix))
}
