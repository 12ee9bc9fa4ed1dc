//! Interrupt arbitration between the receive and transmit sides.
//!
//! Both sides share one bus interrupt line; the line is the logical OR of
//! the two pending flags, so dropping one side only deasserts the line
//! when the other side is idle too.

/// The bus framework's interrupt line, as granted to this device.
pub trait IrqLine {
    /// Asserts the interrupt request at the given priority level.
    fn request(&mut self, level: u8);

    /// Drops the interrupt request.
    fn clear(&mut self);
}

/// Pending-interrupt state for the two sides of the interface.
#[derive(Debug, Default)]
pub struct InterruptState {
    input_pending: bool,
    output_pending: bool,
}

impl InterruptState {
    pub fn input_pending(&self) -> bool {
        self.input_pending
    }

    pub fn output_pending(&self) -> bool {
        self.output_pending
    }

    /// Raises the receive-side interrupt, gated on the receive enable bit.
    pub fn raise_input(&mut self, enabled: bool, line: &mut dyn IrqLine, level: u8) {
        if enabled {
            self.input_pending = true;
            line.request(level);
        }
    }

    /// Raises the transmit-side interrupt, gated on the transmit enable bit.
    pub fn raise_output(&mut self, enabled: bool, line: &mut dyn IrqLine, level: u8) {
        if enabled {
            self.output_pending = true;
            line.request(level);
        }
    }

    /// Withdraws the receive side's request; the line deasserts only if the
    /// transmit side is idle as well.
    pub fn input_off(&mut self, line: &mut dyn IrqLine) {
        if self.input_pending {
            self.input_pending = false;
            if !self.output_pending {
                line.clear();
            }
        }
    }

    /// Withdraws the transmit side's request; the line deasserts only if
    /// the receive side is idle as well.
    pub fn output_off(&mut self, line: &mut dyn IrqLine) {
        if self.output_pending {
            self.output_pending = false;
            if !self.input_pending {
                line.clear();
            }
        }
    }

    pub fn reset(&mut self, line: &mut dyn IrqLine) {
        self.input_off(line);
        self.output_off(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingLine {
        requests: Vec<u8>,
        clears: usize,
        asserted: bool,
    }

    impl IrqLine for RecordingLine {
        fn request(&mut self, level: u8) {
            self.requests.push(level);
            self.asserted = true;
        }

        fn clear(&mut self) {
            self.clears += 1;
            self.asserted = false;
        }
    }

    #[test]
    fn disabled_side_does_not_request() {
        let mut ints = InterruptState::default();
        let mut line = RecordingLine::default();
        ints.raise_input(false, &mut line, 5);
        assert!(!ints.input_pending());
        assert!(line.requests.is_empty());
    }

    #[test]
    fn line_is_or_of_both_sides() {
        let mut ints = InterruptState::default();
        let mut line = RecordingLine::default();

        ints.raise_input(true, &mut line, 5);
        ints.raise_output(true, &mut line, 5);
        assert!(line.asserted);

        // Dropping one side keeps the line up for the other.
        ints.input_off(&mut line);
        assert!(line.asserted);
        assert_eq!(line.clears, 0);

        ints.output_off(&mut line);
        assert!(!line.asserted);
        assert_eq!(line.clears, 1);
    }

    #[test]
    fn off_when_idle_is_a_no_op() {
        let mut ints = InterruptState::default();
        let mut line = RecordingLine::default();
        ints.input_off(&mut line);
        ints.output_off(&mut line);
        assert_eq!(line.clears, 0);
    }
}
