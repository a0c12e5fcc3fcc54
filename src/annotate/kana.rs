/// Convert katakana to hiragana, leaving every other character untouched.
///
/// The prolonged sound mark ー has no hiragana counterpart and is kept.
pub fn katakana_to_hiragana(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'ァ'..='ヶ' | 'ヽ' | 'ヾ' => char::from_u32(c as u32 - 0x60).unwrap_or(c),
            _ => c,
        })
        .collect()
}

pub fn is_kana(c: char) -> bool {
    matches!(c, 'ぁ'..='ゟ' | '゠'..='ヿ')
}
