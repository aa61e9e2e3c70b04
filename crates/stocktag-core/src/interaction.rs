//! # Quantity Selection
//!
//! Pure state of the human confirmation loop that turns a product lookup
//! into a stock movement. The polling loop itself lives in stocktag-sync;
//! this module only decides what each button press does.
//!
//! ## Button Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  quantity starts at 1                                                   │
//! │                                                                         │
//! │  [-] Decrement → quantity = max(1, quantity - 1)   (keeps looping)     │
//! │  [+] Increment → quantity = quantity + 1           (keeps looping)     │
//! │  [✓] Confirm   → Confirmed(quantity)               (loop ends)         │
//! │  [✗] Cancel    → Cancelled                         (loop ends)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// One of the four buttons polled during an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    Decrement,
    Increment,
    Confirm,
    Cancel,
}

impl Button {
    /// Poll order inside a single tick. Confirm and Cancel come last so a
    /// simultaneous adjust + confirm commits the adjusted quantity.
    pub const POLL_ORDER: [Button; 4] = [
        Button::Decrement,
        Button::Increment,
        Button::Confirm,
        Button::Cancel,
    ];
}

/// Result of feeding a press to a [`QuantitySelector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionStep {
    /// Quantity may have changed; keep polling.
    Continue(u32),
    /// The user accepted this quantity.
    Confirmed(u32),
    /// The user backed out.
    Cancelled,
}

impl InteractionStep {
    /// Returns true if the interaction is over.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InteractionStep::Continue(_))
    }
}

/// Quantity being selected, never below 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantitySelector {
    quantity: u32,
}

impl QuantitySelector {
    /// Starts a selection at quantity 1.
    pub fn new() -> Self {
        QuantitySelector { quantity: 1 }
    }

    /// Returns the current quantity.
    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Applies one button press.
    pub fn press(&mut self, button: Button) -> InteractionStep {
        match button {
            Button::Decrement => {
                self.quantity = self.quantity.saturating_sub(1).max(1);
                InteractionStep::Continue(self.quantity)
            }
            Button::Increment => {
                self.quantity = self.quantity.saturating_add(1);
                InteractionStep::Continue(self.quantity)
            }
            Button::Confirm => InteractionStep::Confirmed(self.quantity),
            Button::Cancel => InteractionStep::Cancelled,
        }
    }
}

impl Default for QuantitySelector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_one() {
        assert_eq!(QuantitySelector::new().quantity(), 1);
    }

    #[test]
    fn test_decrement_floors_at_one() {
        let mut selector = QuantitySelector::new();
        for _ in 0..10 {
            assert_eq!(selector.press(Button::Decrement), InteractionStep::Continue(1));
        }
        assert_eq!(selector.quantity(), 1);
    }

    #[test]
    fn test_increment_then_decrement() {
        let mut selector = QuantitySelector::new();
        selector.press(Button::Increment);
        selector.press(Button::Increment);
        selector.press(Button::Increment);
        selector.press(Button::Decrement);
        assert_eq!(selector.press(Button::Confirm), InteractionStep::Confirmed(3));
    }

    #[test]
    fn test_cancel_is_terminal() {
        let mut selector = QuantitySelector::new();
        selector.press(Button::Increment);
        let step = selector.press(Button::Cancel);
        assert_eq!(step, InteractionStep::Cancelled);
        assert!(step.is_terminal());
        assert!(!InteractionStep::Continue(2).is_terminal());
    }
}
