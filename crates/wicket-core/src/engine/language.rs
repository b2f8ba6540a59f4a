//! Best-effort language detection over accumulated model output, used only
//! to pick the continuation prompt.

/// Fraction of characters a script block must exceed before it wins.
const BLOCK_THRESHOLD: f64 = 0.10;

const FRENCH_MARKERS: &str = "àâæçèêëîïôœùûÿ";
const GERMAN_MARKERS: &str = "äöüß";
const SPANISH_MARKERS: &str = "ñáéíóú¿¡";

pub fn detect_language(text: &str) -> &'static str {
    let total = text.chars().count();
    if total == 0 {
        return "en";
    }

    let mut zh = 0usize;
    let mut ja = 0usize;
    let mut ko = 0usize;
    let mut ar = 0usize;
    let mut ru = 0usize;
    for ch in text.chars() {
        let code = ch as u32;
        match code {
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => zh += 1,
            0x3040..=0x309F | 0x30A0..=0x30FF => ja += 1,
            0xAC00..=0xD7AF | 0x1100..=0x11FF => ko += 1,
            0x0600..=0x06FF => ar += 1,
            0x0400..=0x04FF => ru += 1,
            _ => {}
        }
    }

    let threshold = (total as f64 * BLOCK_THRESHOLD) as usize;
    for (count, label) in [(zh, "zh"), (ja, "ja"), (ko, "ko"), (ar, "ar"), (ru, "ru")] {
        if count > threshold {
            return label;
        }
    }

    if text.chars().any(|ch| FRENCH_MARKERS.contains(ch)) {
        return "fr";
    }
    if text.chars().any(|ch| GERMAN_MARKERS.contains(ch)) {
        return "de";
    }
    if text.chars().any(|ch| SPANISH_MARKERS.contains(ch)) {
        return "es";
    }
    "en"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_english_defaults() {
        assert_eq!(detect_language("The quick brown fox."), "en");
        assert_eq!(detect_language(""), "en");
    }

    #[test]
    fn cjk_blocks_win_over_diacritics() {
        assert_eq!(detect_language("这是一个测试,模型正在思考"), "zh");
        assert_eq!(detect_language("これはテストです、続けてください"), "ja");
        assert_eq!(detect_language("이것은 테스트입니다"), "ko");
        assert_eq!(detect_language("هذا اختبار للنموذج"), "ar");
        assert_eq!(detect_language("Это тест модели"), "ru");
    }

    #[test]
    fn sparse_cjk_does_not_trigger() {
        // One ideograph inside a long English sentence stays under 10%.
        let text = "The character 中 appears once in this otherwise English sentence.";
        assert_eq!(detect_language(text), "en");
    }

    #[test]
    fn diacritic_heuristics() {
        assert_eq!(detect_language("Voilà, être prêt c'est tout"), "fr");
        assert_eq!(detect_language("Schöne Grüße aus München"), "de");
        assert_eq!(detect_language("Mañana será otro día"), "es");
    }

    #[test]
    fn french_checked_before_spanish() {
        // Contains both French- and Spanish-flavoured marks; French wins.
        assert_eq!(detect_language("çñ"), "fr");
    }
}
