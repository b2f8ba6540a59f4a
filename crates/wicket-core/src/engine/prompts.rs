//! Continuation prompt table.
//!
//! English and Chinese are operator-configurable; the rest are built-in.
//! Built once from the environment snapshot and never mutated afterwards.

const DEFAULT_EN: &str = "Your previous response was cut off. Continue exactly from where it \
stopped, without repeating anything you already wrote and without mentioning the interruption.";

const DEFAULT_ZH: &str =
    "你刚才的回答被中断了。请从中断的地方继续输出，不要重复已经写过的内容，也不要提及中断。";

const BUILTIN_JA: &str =
    "直前の回答が中断されました。中断した箇所から正確に続けてください。すでに出力した内容は繰り返さないでください。";

const BUILTIN_KO: &str =
    "이전 답변이 중단되었습니다. 중단된 지점부터 정확히 이어서 작성하고, 이미 출력한 내용은 반복하지 마세요.";

const BUILTIN_AR: &str =
    "انقطعت إجابتك السابقة. تابع من حيث توقفت تمامًا دون تكرار ما كتبته ودون الإشارة إلى الانقطاع.";

const BUILTIN_RU: &str = "Ваш предыдущий ответ был прерван. Продолжите ровно с того места, где \
он остановился, не повторяя уже написанное.";

const BUILTIN_FR: &str = "Votre réponse précédente a été interrompue. Reprenez exactement là où \
elle s'est arrêtée, sans répéter ce qui a déjà été écrit.";

const BUILTIN_DE: &str = "Deine vorherige Antwort wurde unterbrochen. Fahre genau dort fort, wo \
sie aufgehört hat, ohne bereits Geschriebenes zu wiederholen.";

const BUILTIN_ES: &str = "Tu respuesta anterior fue interrumpida. Continúa exactamente donde se \
detuvo, sin repetir lo que ya escribiste.";

#[derive(Debug, Clone)]
pub struct RetryPrompts {
    en: String,
    zh: String,
}

impl RetryPrompts {
    pub fn new(en: Option<String>, zh: Option<String>) -> Self {
        Self {
            en: en.unwrap_or_else(|| DEFAULT_EN.to_string()),
            zh: zh.unwrap_or_else(|| DEFAULT_ZH.to_string()),
        }
    }

    pub fn for_language(&self, language: &str) -> &str {
        match language {
            "en" => &self.en,
            "zh" => &self.zh,
            "ja" => BUILTIN_JA,
            "ko" => BUILTIN_KO,
            "ar" => BUILTIN_AR,
            "ru" => BUILTIN_RU,
            "fr" => BUILTIN_FR,
            "de" => BUILTIN_DE,
            "es" => BUILTIN_ES,
            // Language-agnostic fallback.
            _ => &self.en,
        }
    }
}

impl Default for RetryPrompts {
    fn default() -> Self {
        Self::new(None, None)
    }
}
