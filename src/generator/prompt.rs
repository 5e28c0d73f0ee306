use crate::model::{PoemRecord, VoiceParams};

/// Text handed to the speech synthesizer for a poem's narration.
pub fn narration_text(poem: &PoemRecord, voice: &VoiceParams) -> String {
    let verses = poem.verses().collect::<Vec<_>>().join("\n");
    match &voice.style {
        Some(style) => format!("{}: {}", style, verses),
        None => verses,
    }
}

/// Prompt asking the text model for an insight on `poem`.
pub fn insight_prompt(poem: &PoemRecord) -> String {
    let mut prompt = format!(
        "Provide a short literary insight into the following Arabic poem.\n\
         Title: {} ({})\nPoet: {} ({})\n\n{}\n",
        poem.title, poem.title_arabic, poem.poet, poem.poet_arabic, poem.arabic
    );
    if !poem.english.is_empty() {
        prompt.push_str("\nEnglish translation:\n");
        prompt.push_str(&poem.english);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nCover the poetic translation, the historical and cultural context, \
         and the imagery the poet uses.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poem() -> PoemRecord {
        PoemRecord {
            id: "1".into(),
            poet: "Qays".into(),
            poet_arabic: "قيس".into(),
            title: "Layla".into(),
            title_arabic: "ليلى".into(),
            arabic: "أمر على الديار\n\n ديار ليلى ".into(),
            english: String::new(),
            tags: vec![],
        }
    }

    #[test]
    fn test_narration_drops_blank_verses() {
        let text = narration_text(&poem(), &VoiceParams::new("Charon"));
        assert_eq!(text, "أمر على الديار\nديار ليلى");
    }

    #[test]
    fn test_narration_style_prefix() {
        let voice = VoiceParams {
            voice_name: "Charon".into(),
            style: Some("Recite slowly".into()),
        };
        assert!(narration_text(&poem(), &voice).starts_with("Recite slowly: "));
    }

    #[test]
    fn test_insight_prompt_mentions_poem() {
        let p = insight_prompt(&poem());
        assert!(p.contains("Layla (ليلى)"));
        assert!(!p.contains("English translation"));
    }
}
