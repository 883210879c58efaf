// SPDX-License-Identifier: Apache-2.0

use regex::{Captures, Regex};
use std::sync::LazyLock;
use url::form_urlencoded;

static ANCHOR_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)(<a\b[^>]*?\shref\s*=\s*)("[^"]*"|'[^']*')"#).expect("anchor href regex")
});

/// Rewrite each eligible anchor's target into a click-tracking URL.
///
/// Anchors are numbered in document order, counting only rewritten ones.
/// `mailto:`, `tel:`, and fragment links stay byte-identical, as do anchors
/// already pointing at this email's click endpoint, which makes the rewrite
/// idempotent. Nothing else in the document is touched.
#[must_use]
pub fn rewrite_email_links(html: &str, email_id: &str, base_url: &str) -> String {
    let click_prefix = format!("{base_url}/emails/{email_id}/click/");
    let mut link_index: usize = 0;
    ANCHOR_HREF_RE
        .replace_all(html, |caps: &Captures| {
            let prefix = &caps[1];
            let quoted = &caps[2];
            let quote = &quoted[..1];
            let href = &quoted[1..quoted.len() - 1];
            if href.starts_with("mailto:")
                || href.starts_with("tel:")
                || href.starts_with('#')
                || href.starts_with(&click_prefix)
            {
                return caps[0].to_string();
            }
            let encoded: String = form_urlencoded::byte_serialize(href.as_bytes()).collect();
            let rewritten = format!("{click_prefix}{link_index}?url={encoded}");
            link_index += 1;
            format!("{prefix}{quote}{rewritten}{quote}")
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://h";

    #[test]
    fn anchors_are_rewritten_and_indexed_skipping_mailto() {
        let html = r#"<a href="https://a">x</a><a href="mailto:z@z">y</a><a href="https://b">z</a>"#;
        let got = rewrite_email_links(html, "E1", BASE);
        assert_eq!(
            got,
            concat!(
                r#"<a href="https://h/emails/E1/click/0?url=https%3A%2F%2Fa">x</a>"#,
                r#"<a href="mailto:z@z">y</a>"#,
                r#"<a href="https://h/emails/E1/click/1?url=https%3A%2F%2Fb">z</a>"#,
            )
        );
    }

    #[test]
    fn tel_and_fragment_anchors_are_byte_identical() {
        let html = r##"<p>hi</p><a href="tel:+1555">call</a><a href="#top">up</a>"##;
        assert_eq!(rewrite_email_links(html, "E1", BASE), html);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let html = r#"<a href="https://a">x</a><a href="mailto:z@z">y</a><a href="https://b">z</a>"#;
        let once = rewrite_email_links(html, "E1", BASE);
        let twice = rewrite_email_links(&once, "E1", BASE);
        assert_eq!(once, twice);
    }

    #[test]
    fn single_quoted_attributes_are_handled() {
        let html = "<a class='btn' href='https://a'>x</a>";
        let got = rewrite_email_links(html, "E1", BASE);
        assert_eq!(
            got,
            "<a class='btn' href='https://h/emails/E1/click/0?url=https%3A%2F%2Fa'>x</a>"
        );
    }

    #[test]
    fn non_anchor_attributes_and_text_are_untouched() {
        let html = r#"<img src="https://a"><a data-href="https://b">t</a>see https://c"#;
        assert_eq!(rewrite_email_links(html, "E1", BASE), html);
    }

    #[test]
    fn query_strings_are_percent_encoded() {
        let html = r#"<a href="https://a/b?c=d&e=f">x</a>"#;
        let got = rewrite_email_links(html, "E1", BASE);
        assert_eq!(
            got,
            r#"<a href="https://h/emails/E1/click/0?url=https%3A%2F%2Fa%2Fb%3Fc%3Dd%26e%3Df">x</a>"#
        );
    }
}
