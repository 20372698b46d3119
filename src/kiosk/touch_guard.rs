//! Touch hardening for kiosk screens.
//!
//! A public touchscreen must not open context menus or zoom. `TouchGuard` is
//! the decision logic; `script()` renders the same rules as the browser
//! script served at `/static/kiosk.js`, so both share the marker class and
//! the double-tap window below.

/// Body class a page sets to opt into hardening.
pub const KIOSK_MARKER_CLASS: &str = "kiosk-screen";

/// A second touch-end closer than this to the previous one is a double tap.
pub const DOUBLE_TAP_WINDOW_MS: u64 = 300;

/// Browser input events the guard listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureEvent {
    /// Long-press or right-click.
    ContextMenu,
    /// A touch began; `touches` is the number of simultaneous touch points.
    TouchStart { touches: usize },
    /// A touch ended at `at_ms` (monotonic milliseconds).
    TouchEnd { at_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Let the browser's default action run.
    Allow,
    /// Cancel the default action.
    Suppress,
}

/// Per-page gesture filter.
#[derive(Debug, Clone, Default)]
pub struct TouchGuard {
    enabled: bool,
    last_touch_end: Option<u64>,
}

impl TouchGuard {
    /// Enabled only if `body_classes` (space-separated) contains the marker class.
    pub fn new(body_classes: &str) -> Self {
        Self {
            enabled: body_classes
                .split_ascii_whitespace()
                .any(|c| c == KIOSK_MARKER_CLASS),
            last_touch_end: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn handle(&mut self, event: GestureEvent) -> Verdict {
        if !self.enabled {
            return Verdict::Allow;
        }
        match event {
            GestureEvent::ContextMenu => Verdict::Suppress,
            GestureEvent::TouchStart { touches } if touches > 1 => Verdict::Suppress,
            GestureEvent::TouchStart { .. } => Verdict::Allow,
            GestureEvent::TouchEnd { at_ms } => {
                let double_tap = self
                    .last_touch_end
                    .is_some_and(|last| at_ms.saturating_sub(last) < DOUBLE_TAP_WINDOW_MS);
                self.last_touch_end = Some(at_ms);
                if double_tap {
                    Verdict::Suppress
                } else {
                    Verdict::Allow
                }
            }
        }
    }
}

/// Browser script applying the same rules on the kiosk pages.
pub fn script() -> String {
    format!(
        r#"document.addEventListener('DOMContentLoaded', function () {{
  if (!document.body.classList.contains('{marker}')) return;

  document.addEventListener('contextmenu', function (e) {{
    e.preventDefault();
  }});

  document.addEventListener('touchstart', function (e) {{
    if (e.touches.length > 1) e.preventDefault();
  }}, {{ passive: false }});

  var lastTouchEnd = null;
  document.addEventListener('touchend', function (e) {{
    var now = Date.now();
    if (lastTouchEnd !== null && now - lastTouchEnd < {window}) e.preventDefault();
    lastTouchEnd = now;
  }}, {{ passive: false }});
}});
"#,
        marker = KIOSK_MARKER_CLASS,
        window = DOUBLE_TAP_WINDOW_MS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kiosk() -> TouchGuard {
        TouchGuard::new("app kiosk-screen dark")
    }

    #[test]
    fn unmarked_page_allows_everything() {
        let mut guard = TouchGuard::new("app dark");
        assert!(!guard.is_enabled());
        assert_eq!(guard.handle(GestureEvent::ContextMenu), Verdict::Allow);
        assert_eq!(guard.handle(GestureEvent::TouchStart { touches: 2 }), Verdict::Allow);
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 1000 }), Verdict::Allow);
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 1050 }), Verdict::Allow);
    }

    #[test]
    fn marker_must_match_whole_class() {
        assert!(!TouchGuard::new("kiosk-screen-preview").is_enabled());
        assert!(TouchGuard::new("kiosk-screen").is_enabled());
    }

    #[test]
    fn context_menu_suppressed() {
        assert_eq!(kiosk().handle(GestureEvent::ContextMenu), Verdict::Suppress);
    }

    #[test]
    fn pinch_suppressed_single_touch_allowed() {
        let mut guard = kiosk();
        assert_eq!(guard.handle(GestureEvent::TouchStart { touches: 2 }), Verdict::Suppress);
        assert_eq!(guard.handle(GestureEvent::TouchStart { touches: 1 }), Verdict::Allow);
    }

    #[test]
    fn double_tap_within_window_suppressed() {
        let mut guard = kiosk();
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 10_000 }), Verdict::Allow);
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 10_299 }), Verdict::Suppress);
    }

    #[test]
    fn taps_at_or_beyond_window_allowed() {
        let mut guard = kiosk();
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 10_000 }), Verdict::Allow);
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 10_300 }), Verdict::Allow);
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 11_000 }), Verdict::Allow);
    }

    #[test]
    fn suppressed_tap_still_updates_timestamp() {
        let mut guard = kiosk();
        guard.handle(GestureEvent::TouchEnd { at_ms: 0 });
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 200 }), Verdict::Suppress);
        // 350ms after the first tap but only 150ms after the second
        assert_eq!(guard.handle(GestureEvent::TouchEnd { at_ms: 350 }), Verdict::Suppress);
    }

    #[test]
    fn rendered_script_is_exact() {
        let expected = r#"document.addEventListener('DOMContentLoaded', function () {
  if (!document.body.classList.contains('kiosk-screen')) return;

  document.addEventListener('contextmenu', function (e) {
    e.preventDefault();
  });

  document.addEventListener('touchstart', function (e) {
    if (e.touches.length > 1) e.preventDefault();
  }, { passive: false });

  var lastTouchEnd = null;
  document.addEventListener('touchend', function (e) {
    var now = Date.now();
    if (lastTouchEnd !== null && now - lastTouchEnd < 300) e.preventDefault();
    lastTouchEnd = now;
  }, { passive: false });
});
"#;
        assert_eq!(script(), expected);
    }
}
