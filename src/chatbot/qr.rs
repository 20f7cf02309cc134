//! Terminal QR rendering for the operator linking code.

use qrcode::{Color, QrCode};

/// Quiet zone width in modules, required for scanning.
const QUIET_ZONE: usize = 4;

/// Render `data` as a QR code of Unicode half blocks, two module rows per line.
pub fn render(data: &str) -> Option<String> {
    let code = QrCode::new(data.as_bytes()).ok()?;
    let matrix = code.to_colors();
    let width = code.width();
    let total = width + QUIET_ZONE * 2;

    let color_at = |x: usize, y: usize| -> Color {
        if x < QUIET_ZONE || x >= QUIET_ZONE + width || y < QUIET_ZONE || y >= QUIET_ZONE + width {
            Color::Light
        } else {
            matrix[(y - QUIET_ZONE) * width + (x - QUIET_ZONE)]
        }
    };

    let mut out = String::with_capacity((total + 1) * total.div_ceil(2));
    for y in (0..total).step_by(2) {
        for x in 0..total {
            let top = color_at(x, y);
            let bottom = if y + 1 < total { color_at(x, y + 1) } else { Color::Light };
            out.push(match (top, bottom) {
                (Color::Light, Color::Light) => ' ',
                (Color::Dark, Color::Dark) => '\u{2588}',
                (Color::Dark, Color::Light) => '\u{2580}',
                (Color::Light, Color::Dark) => '\u{2584}',
            });
        }
        out.push('\n');
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_dimensions() {
        let data = "https://wa.me/6282212345678";
        let rendered = render(data).unwrap();
        let width = QrCode::new(data.as_bytes()).unwrap().width() + QUIET_ZONE * 2;

        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), width.div_ceil(2));
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }

    #[test]
    fn test_render_has_dark_modules_and_blank_border() {
        let rendered = render("https://wa.me/628").unwrap();
        assert!(rendered.contains('\u{2588}'));
        // First two lines are quiet zone only
        assert!(rendered.lines().next().unwrap().chars().all(|c| c == ' '));
    }
}
