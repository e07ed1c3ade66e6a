/*!
 * Sensor-to-display adapter.
 *
 * Formats every air-quality reading onto four fixed display rows. A missing
 * display drops the reading; a failing display is discarded until the next
 * enumeration brings it back. Every reading is also offered to the adapter's
 * [`ReadingHistory`].
 */
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{error, info, trace};

use crate::device::{DeviceKind, Reading};
use crate::history::ReadingHistory;
use crate::registry::{HandleTable, SharedHandles};

/// First display row used for readings; row 0 holds the title
pub const FIRST_READING_ROW: u8 = 2;

/// Format `reading` into the four display rows
pub fn format_reading(reading: &Reading) -> [String; 4] {
    [
        format!("IAQ:      {:6}", reading.iaq_index),
        format!("Temp:     {:6.2} °C", reading.temperature_celsius()),
        format!("Humidity: {:6.2} %RH", reading.humidity_percent()),
        format!("Air Pres: {:6.2} hPa", reading.air_pressure_hpa()),
    ]
}

/// Writes readings to the active display
#[derive(Debug)]
pub struct DisplayAdapter {
    handles: SharedHandles,
    absent_logged: AtomicBool,
    last: watch::Sender<Option<Reading>>,
    history: ReadingHistory,
}

impl DisplayAdapter {
    /// Create an adapter writing to the display in `handles`
    pub fn new(handles: SharedHandles) -> Self {
        Self::with_history(handles, ReadingHistory::default())
    }

    /// Create an adapter recording readings into `history`
    pub fn with_history(handles: SharedHandles, history: ReadingHistory) -> Self {
        let (last, _) = watch::channel(None);
        Self {
            handles,
            absent_logged: AtomicBool::new(false),
            last,
            history,
        }
    }

    /// Handle one pushed reading
    pub async fn on_reading(&self, reading: Reading) {
        let mut table = self.handles.lock().await;
        self.render(&mut table, reading).await;
    }

    /// Render `reading` with the table already locked
    pub async fn render(&self, table: &mut HandleTable, reading: Reading) {
        self.last.send_replace(Some(reading));
        self.history.record(reading);

        let Some(lcd) = table.display() else {
            self.note_missing_display();
            return;
        };

        for (row, text) in (FIRST_READING_ROW..).zip(format_reading(&reading)) {
            if let Err(e) = lcd.write_line(row, 0, &text).await {
                error!("Writing to {} {} failed, discarding it: {}", DeviceKind::Display, lcd.uid(), e);
                table.remove(DeviceKind::Display);
                return;
            }
        }
        trace!("Rendered {:?}", reading);
    }

    /// Log the first reading dropped for lack of a display; returns whether it logged
    fn note_missing_display(&self) -> bool {
        let first = !self.absent_logged.swap(true, Ordering::SeqCst);
        if first {
            info!("No display attached, readings are dropped");
        }
        first
    }

    /// A display became active again; its next absence is logged anew
    pub fn display_attached(&self) {
        self.absent_logged.store(false, Ordering::SeqCst);
    }

    /// The most recent reading, rendered or not
    pub fn last_reading(&self) -> Option<Reading> {
        *self.last.borrow()
    }

    /// Watch the most recent reading
    pub fn watch_readings(&self) -> watch::Receiver<Option<Reading>> {
        self.last.subscribe()
    }

    /// Readings kept at the logging period
    pub fn history(&self) -> &ReadingHistory {
        &self.history
    }
}
