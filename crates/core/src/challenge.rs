/// Detect interstitial challenge pages (Cloudflare and friends) from the
/// status code plus body signatures. Renderers grant these one extended
/// wait before giving up with `navEndReason=challenge`.

const CHALLENGE_SIGNATURES: &[&str] = &[
    "just a moment",
    "checking your browser",
    "verifying you are human",
    "verify you are human",
    "ddos protection",
    "cf-browser-verification",
    "cf-challenge",
    "cf-turnstile",
    "attention required! | cloudflare",
    "please enable javascript and cookies",
];

pub fn is_challenge_page(status: u16, body: &str) -> bool {
    // Cloudflare interstitials ship as 403/503 with a short shell document.
    let status_hint = matches!(status, 403 | 503 | 429);
    let body_lower = if body.len() > 16 * 1024 {
        body[..16 * 1024].to_lowercase()
    } else {
        body.to_lowercase()
    };

    let signature_hit = CHALLENGE_SIGNATURES.iter().any(|s| body_lower.contains(s));
    if signature_hit && status_hint {
        return true;
    }
    // A signature on a tiny page is convincing even with a 200.
    signature_hit && body.len() < 8 * 1024
}

/// How many extra seconds to grant a detected challenge, capped by config.
pub fn challenge_wait_seconds(body: &str, cap: u64) -> u64 {
    let body_lower = body.to_lowercase();
    let estimate = if body_lower.contains("turnstile") || body_lower.contains("verifying") {
        30
    } else {
        15
    };
    estimate.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_cloudflare_shell() {
        let body = "<html><title>Just a moment...</title><p>Checking your browser before accessing</p></html>";
        assert!(is_challenge_page(503, body));
        assert!(is_challenge_page(403, body));
        // Small page with a signature trips even on 200.
        assert!(is_challenge_page(200, body));
    }

    #[test]
    fn normal_pages_pass() {
        let body = "<html><title>Welcome</title><p>Plenty of real content here.</p></html>";
        assert!(!is_challenge_page(200, body));
        assert!(!is_challenge_page(503, body));
    }

    #[test]
    fn large_page_with_incidental_keyword_passes() {
        let mut body = String::from("<html><p>our blog post about ddos protection strategies</p>");
        body.push_str(&"x".repeat(20 * 1024));
        body.push_str("</html>");
        assert!(!is_challenge_page(200, &body));
    }

    #[test]
    fn wait_time_is_capped() {
        assert_eq!(challenge_wait_seconds("verifying you are human", 45), 30);
        assert_eq!(challenge_wait_seconds("verifying you are human", 10), 10);
        assert_eq!(challenge_wait_seconds("just a moment", 45), 15);
    }
}
