/// ISO 639-3 code for Standard Arabic.
pub const ARABIC_LANGUAGE_CODE: &str = "arb";
pub const UNDETERMINED_LANGUAGE_CODE: &str = "und";

pub trait LanguageClassifier: Send + Sync {
    /// ISO 639-3 code of the dominant language, or `und`.
    fn classify(&self, text: &str) -> String;
}

/// Classifies by writing system only. Arabic script covers several languages
/// but they share the rendering limitation, so all of them map to `arb`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptClassifier;

impl LanguageClassifier for ScriptClassifier {
    fn classify(&self, text: &str) -> String {
        let (arabic, alphabetic) = text
            .chars()
            .filter(|ch| ch.is_alphabetic())
            .fold((0usize, 0usize), |(arabic, total), ch| {
                (arabic + usize::from(is_arabic_script(ch)), total + 1)
            });
        if alphabetic > 0 && arabic * 2 > alphabetic {
            ARABIC_LANGUAGE_CODE.to_string()
        } else {
            UNDETERMINED_LANGUAGE_CODE.to_string()
        }
    }
}

fn is_arabic_script(ch: char) -> bool {
    matches!(
        ch,
        '\u{0600}'..='\u{06FF}'
            | '\u{0750}'..='\u{077F}'
            | '\u{08A0}'..='\u{08FF}'
            | '\u{FB50}'..='\u{FDFF}'
            | '\u{FE70}'..='\u{FEFF}'
    )
}
