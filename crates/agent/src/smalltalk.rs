//! Small-talk short circuit: greetings, thanks, and clock questions get a
//! canned reply without touching the classifier or the LLM.

use chrono::{DateTime, Utc};

const GREETING_TOKENS: &[&str] =
    &["bonjour", "salut", "bonsoir", "coucou", "hello", "hi", "hey", "yo"];

const THANKS_TOKENS: &[&str] = &["merci", "merci beaucoup", "thanks", "thank you", "super merci"];

const TIME_MARKERS: &[&str] = &["quelle heure", "what time", "l'heure qu'il est"];

const FAREWELL_TOKENS: &[&str] = &["au revoir", "à bientôt", "bonne journée", "bye", "goodbye"];

pub const GREETING_REPLY: &str = "Bonjour ! Comment puis-je vous aider aujourd'hui ?";
pub const THANKS_REPLY: &str = "Avec plaisir ! N'hésitez pas si vous avez besoin d'autre chose.";
pub const FAREWELL_REPLY: &str = "Au revoir, à bientôt !";

/// Return the canned reply when the utterance is pure small talk.
pub fn smalltalk_reply(text: &str, now: DateTime<Utc>) -> Option<String> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }

    if GREETING_TOKENS.contains(&normalized.as_str()) {
        return Some(GREETING_REPLY.to_string());
    }
    if THANKS_TOKENS.contains(&normalized.as_str()) {
        return Some(THANKS_REPLY.to_string());
    }
    if FAREWELL_TOKENS.contains(&normalized.as_str()) {
        return Some(FAREWELL_REPLY.to_string());
    }
    if TIME_MARKERS.iter().any(|marker| normalized.contains(marker)) {
        return Some(format!("Il est {} (UTC).", now.format("%H:%M")));
    }

    None
}

fn normalize(text: &str) -> String {
    text.trim().trim_end_matches(['!', '?', '.', ' ']).to_lowercase()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{smalltalk_reply, GREETING_REPLY, THANKS_REPLY};

    #[test]
    fn greetings_short_circuit_with_the_template() {
        for text in ["Bonjour", "salut !", "Hello", "BONSOIR"] {
            assert_eq!(smalltalk_reply(text, Utc::now()).as_deref(), Some(GREETING_REPLY), "{text}");
        }
    }

    #[test]
    fn thanks_and_time_are_handled_without_the_llm() {
        assert_eq!(smalltalk_reply("merci", Utc::now()).as_deref(), Some(THANKS_REPLY));

        let now = Utc.with_ymd_and_hms(2026, 8, 5, 14, 30, 0).unwrap();
        let reply = smalltalk_reply("quelle heure est-il ?", now).expect("time reply");
        assert!(reply.contains("14:30"));
    }

    #[test]
    fn real_requests_are_not_small_talk() {
        for text in [
            "Bonjour, envoie un email à Jean",
            "ajoute le contact Marie",
            "crée une tâche",
        ] {
            assert_eq!(smalltalk_reply(text, Utc::now()), None, "{text}");
        }
    }
}
