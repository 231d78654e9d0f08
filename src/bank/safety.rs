/// Substrings that mark a trainer request as an attempt to produce phishing
/// material (or to smuggle a live link into the lesson flow).
const HARMFUL_PATTERNS: &[&str] = &[
    "generate phishing",
    "create phishing",
    "make phishing",
    "phishing template",
    "phishing email",
    "impersonate",
    "spoof",
    "steal credentials",
    "fake email",
    "malicious link",
    "actual phishing",
    "real phishing",
    "send phishing",
    "click here to",
    "http://",
    "https://",
    ".com",
    ".org",
    "steal",
    "hack",
];

pub const REFUSAL: &str = "I cannot generate phishing templates, links, or impersonation content. \
I provide only defensive, educational lessons.";

/// Case-insensitive check against the refusal patterns.
pub fn is_harmful_request(text: &str) -> bool {
    let lower = text.to_lowercase();
    HARMFUL_PATTERNS.iter().any(|p| lower.contains(p))
}
