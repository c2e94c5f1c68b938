//! Translation of alternate formatting markers into host color codes.

pub const ALT_COLOR_CHAR: char = '&';
pub const SECTION_SIGN: char = '\u{a7}';

const FORMAT_CODES: &str = "0123456789AaBbCcDdEeFfKkLlMmNnOoRrXx";

/// Replaces every `alt` marker followed by a known format code with the
/// section sign and the lowercased code. Unknown pairs are left untouched.
pub fn translate_color_codes(alt: char, text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(character) = chars.next() {
        if character == alt {
            if let Some(&code) = chars.peek() {
                if FORMAT_CODES.contains(code) {
                    output.push(SECTION_SIGN);
                    output.push(code.to_ascii_lowercase());
                    chars.next();
                    continue;
                }
            }
        }
        output.push(character);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_translate_replaces_known_codes_and_lowercases() {
        assert_eq!(
            translate_color_codes(ALT_COLOR_CHAR, "&7[AFK] &R"),
            "\u{a7}7[AFK] \u{a7}r"
        );
    }

    #[test]
    fn unit_translate_leaves_unknown_pairs_and_trailing_marker() {
        assert_eq!(translate_color_codes('&', "Tom&Jerry &"), "Tom&Jerry &");
        assert_eq!(translate_color_codes('&', "&&a"), "&\u{a7}a");
    }

    #[test]
    fn unit_translate_is_identity_without_markers() {
        assert_eq!(translate_color_codes('&', "[VIP] "), "[VIP] ");
        assert_eq!(translate_color_codes('&', ""), "");
    }
}
