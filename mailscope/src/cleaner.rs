//! Signature and quoted-thread removal.

/// Lines containing any of these (case-insensitively) start the footer.
pub const SIGNATURE_STARTERS: &[&str] = &[
    "CONFIDENTIALITY AND DISCLAIMER NOTICE",
    "Email:",
    "*From:*",
    "*Sent:*",
    "*To:*",
    "*Subject:*",
    "-----Original Message-----",
    "Sent from my",
];

/// Drop everything from the first line that looks like a signature or quoted header.
pub fn strip_signature(text: &str) -> String {
    strip_with(text, SIGNATURE_STARTERS)
}

pub fn strip_with(text: &str, starters: &[&str]) -> String {
    let starters: Vec<String> = starters.iter().map(|s| s.to_lowercase()).collect();
    text.lines()
        .take_while(|line| {
            let line = line.to_lowercase();
            !starters.iter().any(|kw| line.contains(kw.as_str()))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
