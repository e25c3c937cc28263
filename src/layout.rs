//! Page layout of a transcript: an append-only list of drawing primitives
//! positioned with a running top-down cursor.

use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate};

use crate::grades::round2;
use crate::metrics::{self, Font};
use crate::models::{TranscriptDocument, ValidatedRecord, ValidatedUnit};

pub const PAGE_WIDTH: f32 = 595.0;
pub const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 36.0;
const TOP: f32 = 800.0;
const ROW_HEIGHT: f32 = 15.0;
const UNIT_SPACING: f32 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    const fn rgb8(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Components in the 0..=1 range used by PDF color operators.
    pub fn unit(self) -> [f32; 3] {
        [self.r, self.g, self.b].map(|c| f32::from(c) / 255.0)
    }
}

pub const PRIMARY: Color = Color::rgb8(0, 128, 96);
pub const SECONDARY: Color = Color::rgb8(235, 248, 242);
pub const WHITE: Color = Color::rgb8(255, 255, 255);
pub const SUCCESS: Color = PRIMARY;
pub const DANGER: Color = Color::rgb8(220, 53, 69);
pub const TEXT: Color = Color::rgb8(33, 37, 41);
pub const MUTED: Color = Color::rgb8(108, 117, 125);
pub const YELLOW: Color = Color::rgb8(255, 193, 7);
const RULE: Color = Color::rgb8(242, 242, 242);

#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: Color,
    },
    Text {
        x: f32,
        y: f32,
        size: f32,
        font: Font,
        color: Color,
        text: String,
    },
    Logo {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

/// Fixed-size page holding the primitives in drawing order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub width: f32,
    pub height: f32,
    pub ops: Vec<DrawOp>,
}

impl RenderedPage {
    fn new() -> Self {
        Self {
            width: PAGE_WIDTH,
            height: PAGE_HEIGHT,
            ops: Vec::new(),
        }
    }

    fn rect(&mut self, x: f32, y: f32, width: f32, height: f32, color: Color) {
        self.ops.push(DrawOp::Rect {
            x,
            y,
            width,
            height,
            color,
        });
    }

    fn text(&mut self, text: impl Into<String>, x: f32, y: f32, size: f32, font: Font, color: Color) {
        self.ops.push(DrawOp::Text {
            x,
            y,
            size,
            font,
            color,
            text: text.into(),
        });
    }

    #[cfg(test)]
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn has_logo(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, DrawOp::Logo { .. }))
    }
}

const UNIT_FIRST: [&str; 6] = [
    "HE",
    "Développement Personnel",
    "Entreprenariat",
    "UE01",
    "UE02",
    "UE06",
];
const UNIT_SECOND: [&str; 4] = ["ST", "UE03", "UE04", "UE88"];

/// Humanities-like units first, science units second, specialties last.
pub fn unit_priority(code: &str) -> u8 {
    if UNIT_FIRST.iter().any(|marker| code.contains(marker)) {
        0
    } else if UNIT_SECOND.iter().any(|marker| code.contains(marker)) {
        1
    } else {
        2
    }
}

pub fn module_priority(code: &str) -> u8 {
    if code.starts_with("HE") {
        0
    } else if code.starts_with("ST") {
        1
    } else {
        2
    }
}

fn by_priority(left: (u8, &str), right: (u8, &str)) -> Ordering {
    left.0.cmp(&right.0).then_with(|| left.1.cmp(right.1))
}

pub fn ordered_units(units: &[ValidatedUnit]) -> Vec<&ValidatedUnit> {
    let mut ordered: Vec<&ValidatedUnit> = units.iter().collect();
    ordered.sort_by(|a, b| {
        by_priority(
            (unit_priority(&a.code), &a.code),
            (unit_priority(&b.code), &b.code),
        )
    });
    ordered
}

pub fn ordered_records(unit: &ValidatedUnit) -> Vec<&ValidatedRecord> {
    let mut ordered: Vec<&ValidatedRecord> = unit.records.iter().collect();
    ordered.sort_by(|a, b| {
        let (a, b) = (&a.record.module_code, &b.record.module_code);
        by_priority((module_priority(a), a), (module_priority(b), b))
    });
    ordered
}

const MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

/// Long French date, e.g. "3 juillet 2025".
pub fn format_date_fr(date: NaiveDate) -> String {
    format!(
        "{} {} {}",
        date.day(),
        MONTHS[date.month0() as usize],
        date.year()
    )
}

fn or_placeholder<'a>(value: Option<&'a str>, placeholder: &'a str) -> &'a str {
    match value {
        Some(value) if !value.trim().is_empty() => value,
        _ => placeholder,
    }
}

fn format_credits(value: f64) -> String {
    let value = round2(value);
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

pub fn layout(document: &TranscriptDocument, with_logo: bool) -> RenderedPage {
    let mut page = RenderedPage::new();
    let width = page.width;

    page.rect(0.0, 0.0, width, PAGE_HEIGHT, WHITE);

    let mut y = TOP;
    y = draw_header(&mut page, y, width, with_logo);
    y = draw_student(&mut page, document, y, width);
    y = draw_table(&mut page, document, y, width);
    draw_validation(&mut page, document, y, width);
    draw_footer(&mut page, width);

    page
}

fn draw_header(page: &mut RenderedPage, y: f32, width: f32, with_logo: bool) -> f32 {
    page.rect(MARGIN, y - 40.0, width - 2.0 * MARGIN, 40.0, SECONDARY);

    if with_logo {
        page.ops.push(DrawOp::Logo {
            x: MARGIN + 10.0,
            y: y - 35.0,
            width: 30.0,
            height: 30.0,
        });
    }

    page.text("École Supérieure Polytechnique", MARGIN + 50.0, y - 18.0, 12.0, Font::Bold, PRIMARY);
    page.rect(MARGIN + 50.0, y - 20.0, 180.0, 1.5, YELLOW);
    page.text("Année universitaire", MARGIN + 50.0, y - 30.0, 8.0, Font::Regular, MUTED);

    let title_x = width - MARGIN - 120.0;
    page.text("RELEVÉ DE NOTES", title_x, y - 18.0, 12.0, Font::Bold, TEXT);
    page.rect(title_x, y - 20.0, 110.0, 1.5, YELLOW);
    page.text("Document officiel", title_x, y - 30.0, 8.0, Font::Regular, MUTED);

    y - 50.0
}

fn draw_field(page: &mut RenderedPage, label: &str, value: &str, x: f32, y: f32, font: Font) {
    page.text(label, x, y, 8.0, Font::Regular, MUTED);
    page.text(value, x, y - 15.0, 10.0, font, TEXT);
}

fn draw_student(page: &mut RenderedPage, document: &TranscriptDocument, y: f32, width: f32) -> f32 {
    let column = (width - 2.0 * MARGIN) / 3.0;
    let student = &document.student;

    draw_field(page, "Nom de Famille", or_placeholder(student.last_name.as_deref(), ""), MARGIN, y, Font::Bold);
    draw_field(page, "Prénom du Père", or_placeholder(student.first_name.as_deref(), ""), MARGIN + column, y, Font::Bold);
    draw_field(page, "Matricule", or_placeholder(student.matricule.as_deref(), ""), MARGIN + 2.0 * column, y, Font::Bold);

    let y = y - 40.0;
    draw_field(page, "Spécialité", or_placeholder(student.speciality.as_deref(), "Non définie"), MARGIN, y, Font::Bold);
    draw_field(page, "Semestre", or_placeholder(document.semester.label.as_deref(), "Non défini"), MARGIN + column, y, Font::Bold);
    draw_field(page, "Email", or_placeholder(student.email.as_deref(), ""), MARGIN + 2.0 * column, y, Font::Regular);

    y - 30.0
}

fn column_widths(width: f32) -> [f32; 5] {
    [60.0, width - 2.0 * MARGIN - 240.0, 40.0, 40.0, 100.0]
}

fn draw_table_header(page: &mut RenderedPage, y: f32, width: f32) -> f32 {
    page.rect(MARGIN, y - 20.0, width - 2.0 * MARGIN, 20.0, SECONDARY);

    let mut x = MARGIN + 10.0;
    for (header, column) in ["Code", "Élément Module", "Crédit", "Note", "Statut"]
        .into_iter()
        .zip(column_widths(width))
    {
        page.text(header, x, y - 13.0, 9.0, Font::Bold, TEXT);
        x += column;
    }

    y - 20.0
}

fn draw_table(page: &mut RenderedPage, document: &TranscriptDocument, y: f32, width: f32) -> f32 {
    let columns = column_widths(width);
    let mut y = draw_table_header(page, y, width);

    for unit in ordered_units(&document.units) {
        let title = format!("UE: {}", unit.code);
        page.rect(MARGIN, y - 20.0, width - 2.0 * MARGIN, 20.0, SECONDARY);
        let title_width = metrics::text_width(&title, Font::Bold, 9.0);
        page.text(title, MARGIN + 10.0, y - 13.0, 9.0, Font::Bold, PRIMARY);
        page.rect(MARGIN + 10.0, y - 15.0, title_width, 1.0, YELLOW);
        y -= 20.0;

        for outcome in ordered_records(unit) {
            let record = &outcome.record;
            page.rect(MARGIN, y - ROW_HEIGHT, width - 2.0 * MARGIN, ROW_HEIGHT, WHITE);
            page.rect(MARGIN, y - ROW_HEIGHT, width - 2.0 * MARGIN, 0.5, RULE);

            let mut x = MARGIN + 10.0;
            page.text(record.module_code.as_str(), x, y - 10.0, 8.0, Font::Regular, TEXT);
            x += columns[0];

            let title = or_placeholder(record.module_title.as_deref(), "N/A");
            let title = metrics::fit_text(title, Font::Regular, 8.0, columns[1] - 6.0);
            page.text(title, x, y - 10.0, 8.0, Font::Regular, TEXT);
            x += columns[1];

            page.text(format_credits(record.credits), x, y - 10.0, 8.0, Font::Regular, TEXT);
            x += columns[2];

            page.text(format!("{:.2}", record.overall), x, y - 10.0, 8.0, Font::Regular, TEXT);
            x += columns[3];

            let (label, color) = if outcome.validated() {
                ("Validé", SUCCESS)
            } else {
                ("Non Validé", DANGER)
            };
            page.rect(x, y - 12.0, 50.0, 10.0, color);
            page.text(label, x + 5.0, y - 10.0, 7.0, Font::Bold, WHITE);

            y -= ROW_HEIGHT;
        }

        y -= UNIT_SPACING;
    }

    y
}

fn draw_validation(page: &mut RenderedPage, document: &TranscriptDocument, y: f32, width: f32) -> f32 {
    page.rect(MARGIN, y - 20.0, width - 2.0 * MARGIN, 20.0, SECONDARY);
    page.text("VALIDATION", MARGIN + 10.0, y - 13.0, 10.0, Font::Bold, PRIMARY);
    page.rect(MARGIN + 10.0, y - 15.0, 80.0, 1.5, YELLOW);

    let y = y - 30.0;
    let (badge, color) = if document.semester_validated {
        ("SEMESTRE VALIDÉ", SUCCESS)
    } else {
        ("SEMESTRE NON VALIDÉ", DANGER)
    };
    page.rect(MARGIN, y - 20.0, 150.0, 20.0, color);
    page.text(badge, MARGIN + 10.0, y - 13.0, 9.0, Font::Bold, WHITE);

    let semester = or_placeholder(document.semester.label.as_deref(), "Non précisé");
    page.text(format!("Semestre concerné : {semester}"), MARGIN, y - 35.0, 9.0, Font::Bold, TEXT);
    page.text(
        format!(
            "Crédits obtenus : {}/{}",
            format_credits(document.credits_validated),
            format_credits(document.credits_total)
        ),
        MARGIN,
        y - 50.0,
        9.0,
        Font::Bold,
        TEXT,
    );
    let average = document
        .average
        .map(|average| format!("{average:.2}"))
        .unwrap_or_else(|| "N/A".to_string());
    page.text(format!("Moyenne générale : {average}"), MARGIN, y - 65.0, 9.0, Font::Bold, TEXT);

    let signature_x = width - MARGIN - 200.0;
    page.text("Le Directeur des Études", signature_x, y - 15.0, 9.0, Font::Regular, TEXT);
    page.rect(signature_x, y - 45.0, 150.0, 1.0, PRIMARY);

    let date = document
        .signed_on
        .map(format_date_fr)
        .unwrap_or_else(|| "Non défini".to_string());
    page.text(format!("FAIT À NOUAKCHOTT, LE {date}"), signature_x, y - 60.0, 7.0, Font::Regular, MUTED);

    y - 80.0
}

fn draw_footer(page: &mut RenderedPage, width: f32) {
    page.rect(MARGIN, MARGIN, width - 2.0 * MARGIN, 20.0, PRIMARY);

    let warning = "CE DOCUMENT N'EST PAS VALABLE SANS SIGNATURE";
    let warning_width = metrics::text_width(warning, Font::Regular, 8.0);
    page.text(warning, (width - warning_width) / 2.0, MARGIN + 7.0, 8.0, Font::Regular, WHITE);
    page.text("Page 1/1", width - MARGIN - 30.0, MARGIN + 7.0, 7.0, Font::Regular, WHITE);
}
