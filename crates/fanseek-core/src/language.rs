//! Search language tags accepted by the backend.
//!
//! A tag is accepted only if it is shaped like `xx`, `xxx` or `xx-yy` (lowercase ASCII) and is
//! one of the codes below. Anything else is dropped by callers rather than reported.

const KNOWN_LANGUAGES: &[&str] = &[
    "af", "am", "ar", "az", "be", "bg", "bn", "bs", "ca", "ca-es", "cs", "cs-cz", "cy", "da",
    "da-dk", "de", "de-at", "de-ch", "de-de", "el", "el-gr", "en", "en-au", "en-ca", "en-gb",
    "en-ie", "en-in", "en-nz", "en-ph", "en-sg", "en-us", "en-za", "es", "es-ar", "es-cl",
    "es-co", "es-es", "es-mx", "es-pe", "es-us", "et", "eu", "fa", "fi", "fi-fi", "fil", "fr",
    "fr-be", "fr-ca", "fr-ch", "fr-fr", "ga", "gl", "gu", "he", "hi", "hr", "hu", "hu-hu", "hy",
    "id", "id-id", "is", "it", "it-ch", "it-it", "ja", "ja-jp", "ka", "kk", "km", "kn", "ko",
    "ko-kr", "lt", "lv", "mk", "ml", "mn", "mr", "ms", "my", "nb", "nb-no", "ne", "nl", "nl-be",
    "nl-nl", "no", "pa", "pl", "pl-pl", "pt", "pt-br", "pt-pt", "ro", "ro-ro", "ru", "ru-ru",
    "si", "sk", "sl", "sq", "sr", "sv", "sv-se", "sw", "ta", "te", "th", "th-th", "tr", "tr-tr",
    "uk", "uk-ua", "ur", "uz", "vi", "vi-vn", "zh", "zh-cn", "zh-hk", "zh-tw",
];

/// A validated, normalized (trimmed, lowercase) language tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Language(String);

impl Language {
    /// Returns `None` for anything that is not a known tag.
    pub fn parse(raw: &str) -> Option<Self> {
        let tag = raw.trim().to_ascii_lowercase();
        if !is_well_formed(&tag) {
            return None;
        }
        KNOWN_LANGUAGES
            .binary_search(&tag.as_str())
            .ok()
            .map(|_| Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ^[a-z]{2,3}(-[a-z]{2})?$
fn is_well_formed(tag: &str) -> bool {
    let (primary, region) = match tag.split_once('-') {
        Some((p, r)) => (p, Some(r)),
        None => (tag, None),
    };
    let lower = |s: &str| s.bytes().all(|b| b.is_ascii_lowercase());
    if !(2..=3).contains(&primary.len()) || !lower(primary) {
        return false;
    }
    match region {
        None => true,
        Some(r) => r.len() == 2 && lower(r),
    }
}
