//! Stand-ins for a compositor: popups go to the log instead of the screen.

use sni_host::{
    error::SurfaceError,
    input::SurfaceId,
    popup::{MenuFrame, PopupRequest, RowKind, TextMeasure, Windowing},
};

/// Logical size of one character cell.
const CELL_WIDTH: i32 = 8;
const CELL_HEIGHT: i32 = 16;

/// Every character is one cell wide.
pub struct CellMeasure;

impl TextMeasure for CellMeasure {
    fn measure(&self, text: &str) -> (i32, i32) {
        (text.chars().count() as i32 * CELL_WIDTH, CELL_HEIGHT)
    }
}

fn describe_row(kind: &RowKind, hovered: bool) -> String {
    match kind {
        RowKind::Separator => "  --------".to_string(),
        RowKind::Entry { label, enabled, checked, submenu, .. } => format!(
            "{}{}{}{}{}",
            if hovered { "> " } else { "  " },
            if *checked { "[x] " } else { "" },
            label,
            if *submenu { " >" } else { "" },
            if *enabled { "" } else { " (disabled)" },
        ),
    }
}

#[derive(Debug, Default)]
pub struct LogWindowing {
    next: u64,
}

impl Windowing for LogWindowing {
    fn create_popup(&mut self, request: &PopupRequest) -> Result<SurfaceId, SurfaceError> {
        self.next += 1;
        log::info!(
            "popup {} on output {} ({}x{}), anchored at {:?} of {:?}",
            self.next,
            request.output.0,
            request.width,
            request.height,
            request.anchor_corner,
            request.anchor
        );
        Ok(SurfaceId(self.next))
    }

    fn draw(&mut self, surface: SurfaceId, frame: &MenuFrame) -> Result<(), SurfaceError> {
        log::info!("popup {} shows menu {}:", surface.0, frame.menu);
        for row in &frame.rows {
            log::info!("{}", describe_row(&row.kind, frame.hovered == Some(row.id)));
        }
        Ok(())
    }

    fn destroy_popup(&mut self, surface: SurfaceId) {
        log::info!("popup {} closed", surface.0);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use sni_host::{menu::ToggleType, popup::EntryIcon};

    #[test]
    fn test_describe_row() {
        let entry = |label: &str, enabled, checked, submenu| RowKind::Entry {
            label: label.to_string(),
            enabled,
            toggle: ToggleType::Checkmark,
            checked,
            icon: EntryIcon::None,
            submenu,
        };
        assert_eq!(describe_row(&entry("Mute", true, true, false), true), "> [x] Mute");
        assert_eq!(describe_row(&entry("Devices", false, false, true), false), "  Devices > (disabled)");
        assert_eq!(describe_row(&RowKind::Separator, false), "  --------");
    }

    #[test]
    fn test_cells() {
        assert_eq!(CellMeasure.measure("Quit"), (32, 16));
    }
}
