//! Keyword heuristic that picks the avatar's facial expression from what she
//! just said.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Feliz,
    Triste,
    Sorprendida,
    Enojada,
}

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Feliz => "feliz",
            Emotion::Triste => "triste",
            Emotion::Sorprendida => "sorprendida",
            Emotion::Enojada => "enojada",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked top to bottom; the first group with a hit wins.
const RULES: [(Emotion, &[&str]); 4] = [
    (Emotion::Feliz, &["gracias", "feliz", "jeje", "divertido"]),
    (Emotion::Triste, &["perdon", "triste", "lo siento", "gomen"]),
    (Emotion::Sorprendida, &["nani", "que?!", "sorpresa", "wow"]),
    (Emotion::Enojada, &["baka", "enojada", "molesta"]),
];

/// Classify an avatar utterance. Matching is a case-insensitive substring
/// search, so "Gracias" and "graciass" both count.
pub fn classify(text: &str) -> Emotion {
    let lowered = text.to_lowercase();
    RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(emotion, _)| *emotion)
        .unwrap_or(Emotion::Neutral)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_group() {
        assert_eq!(classify("muchas gracias, jeje"), Emotion::Feliz);
        assert_eq!(classify("lo siento mucho"), Emotion::Triste);
        assert_eq!(classify("wow, nani?!"), Emotion::Sorprendida);
        assert_eq!(classify("estás baka"), Emotion::Enojada);
        assert_eq!(classify("hola como estas"), Emotion::Neutral);
    }

    #[test]
    fn test_happy_beats_sad() {
        assert_eq!(classify("estoy triste pero gracias"), Emotion::Feliz);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classify("GOMEN NE"), Emotion::Triste);
        assert_eq!(classify("¿QUE?! no puede ser"), Emotion::Sorprendida);
    }

    #[test]
    fn test_accented_perdon_does_not_match() {
        // only the unaccented spelling is a keyword
        assert_eq!(classify("perdón"), Emotion::Neutral);
    }

    #[test]
    fn test_empty_text_is_neutral() {
        assert_eq!(classify(""), Emotion::Neutral);
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Emotion::Sorprendida).unwrap(), "\"sorprendida\"");
        assert_eq!(Emotion::Feliz.to_string(), "feliz");
    }
}
