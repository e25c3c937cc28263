//! Glyph advance widths of the two standard PDF fonts used on transcripts,
//! in thousandths of the font size (Adobe core-font metrics, ASCII range).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Font {
    Regular,
    Bold,
}

impl Font {
    pub fn base_font(self) -> &'static str {
        match self {
            Self::Regular => "Helvetica",
            Self::Bold => "Helvetica-Bold",
        }
    }

    pub fn resource_name(self) -> &'static str {
        match self {
            Self::Regular => "F1",
            Self::Bold => "F2",
        }
    }
}

#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

const FALLBACK_WIDTH: u16 = 556;

/// Accented Latin letters share the advance of their base letter.
fn base_letter(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'ç' => 'c',
        'Ç' => 'C',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'È' | 'É' | 'Ê' | 'Ë' => 'E',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
        'ñ' => 'n',
        'Ñ' => 'N',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
        'ý' | 'ÿ' => 'y',
        'Ý' => 'Y',
        '’' | '‘' => '\'',
        '\u{a0}' => ' ',
        other => other,
    }
}

fn glyph_width(font: Font, c: char) -> u16 {
    let table = match font {
        Font::Regular => &HELVETICA,
        Font::Bold => &HELVETICA_BOLD,
    };
    let code = base_letter(c) as u32;
    if (32..=126).contains(&code) {
        table[(code - 32) as usize]
    } else {
        FALLBACK_WIDTH
    }
}

pub fn text_width(text: &str, font: Font, size: f32) -> f32 {
    let units: u32 = text.chars().map(|c| u32::from(glyph_width(font, c))).sum();
    units as f32 * size / 1000.0
}

/// Cuts `text` so that it fits in `max_width`, ending with "..." when cut.
pub fn fit_text(text: &str, font: Font, size: f32, max_width: f32) -> String {
    if text_width(text, font, size) <= max_width {
        return text.to_string();
    }

    let ellipsis = "...";
    let budget = max_width - text_width(ellipsis, font, size);
    let mut fitted = String::new();
    let mut used = 0.0;
    for c in text.chars() {
        let advance = f32::from(glyph_width(font, c)) * size / 1000.0;
        if used + advance > budget {
            break;
        }
        used += advance;
        fitted.push(c);
    }
    fitted.truncate(fitted.trim_end().len());
    fitted.push_str(ellipsis);
    fitted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_follow_core_metrics() {
        assert_eq!(text_width("A", Font::Regular, 1000.0), 667.0);
        assert_eq!(text_width("A", Font::Bold, 1000.0), 722.0);
        assert_eq!(text_width("  ", Font::Regular, 10.0), 5.56);
    }

    #[test]
    fn accents_use_base_letter_width() {
        assert_eq!(
            text_width("RELEVÉ", Font::Bold, 12.0),
            text_width("RELEVE", Font::Bold, 12.0)
        );
    }

    #[test]
    fn long_text_is_cut_with_ellipsis() {
        let title = "Analyse numérique et méthodes d'optimisation pour l'ingénieur";
        let fitted = fit_text(title, Font::Regular, 8.0, 100.0);
        assert!(fitted.ends_with("..."));
        assert!(text_width(&fitted, Font::Regular, 8.0) <= 100.0);
        assert_eq!(fit_text("Anglais", Font::Regular, 8.0, 100.0), "Anglais");
    }
}
