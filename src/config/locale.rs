//! Locale to `Accept-Language` mapping for code-pair requests.

/// Header value used when no locale is set or the locale is not supported.
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US";

/// Closest supported `Accept-Language` value for each supported locale.
const LOCALE_LANGUAGES: &[(&str, &str)] = &[
    ("de-DE", "de-DE"),
    ("en-AU", "en-US"),
    ("en-CA", "en-US"),
    ("en-GB", "en-GB"),
    ("en-IN", "en-US"),
    ("en-US", "en-US"),
    ("es-ES", "es-ES"),
    ("es-MX", "es-ES"),
    ("es-US", "es-ES"),
    ("fr-CA", "fr-FR"),
    ("fr-FR", "fr-FR"),
    ("hi-IN", "en-US"),
    ("it-IT", "it-IT"),
    ("ja-JP", "ja-JP"),
    ("pt-BR", "pt-BR"),
];

/// Resolve the `Accept-Language` header value for a locale.
pub fn accept_language(locale: &str) -> &'static str {
    if locale.is_empty() {
        tracing::warn!(
            default = DEFAULT_ACCEPT_LANGUAGE,
            "No locale set, using default Accept-Language"
        );
        return DEFAULT_ACCEPT_LANGUAGE;
    }
    match LOCALE_LANGUAGES.iter().find(|(l, _)| *l == locale) {
        Some((_, language)) => *language,
        None => {
            tracing::warn!(
                locale,
                default = DEFAULT_ACCEPT_LANGUAGE,
                "Locale not supported, using default Accept-Language"
            );
            DEFAULT_ACCEPT_LANGUAGE
        }
    }
}
