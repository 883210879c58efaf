use sha1::{Digest, Sha1};

const SLUG_HASH_LEN: usize = 12;

/// Derive a URL slug from a display string.
///
/// Lowercase and trim, map `/` to `-`, expand `&` and ` + ` to `and`, keep
/// `[a-z0-9]`, turn whitespace runs and literal `-`/`_` into hyphens, then
/// trim hyphens from the ends. When nothing survives, fall back to the first
/// 12 hex chars of the SHA-1 of the lowercased, trimmed, substituted string
/// so the slug is still deterministic and non-empty.
#[must_use]
pub fn slugify(input: &str) -> String {
    let lowered = input.to_lowercase();
    let trimmed = lowered.trim();
    let replaced = trimmed
        .replace('/', "-")
        .replace('&', " and ")
        .replace(" + ", " and ");

    let mut out = String::with_capacity(replaced.len());
    let mut pending_space = false;
    for c in replaced.chars() {
        if c == ' ' {
            pending_space = true;
            continue;
        }
        let mapped = match c {
            'a'..='z' | '0'..='9' => Some(c),
            '-' | '_' => Some('-'),
            _ => None,
        };
        if let Some(m) = mapped {
            if pending_space {
                out.push('-');
                pending_space = false;
            }
            out.push(m);
        }
    }

    let out = out.trim_matches('-');
    if out.is_empty() {
        let digest = Sha1::digest(replaced.as_bytes());
        return hex::encode(digest)[..SLUG_HASH_LEN].to_string();
    }
    out.to_string()
}
