//! Encoded packet
//!
//! Compressed payload plus timing, exchanged between engines and the
//! WebCodecs chunk types.

/// Owned encoded packet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
  data: Vec<u8>,
  pts: i64,
  duration: Option<i64>,
  key: bool,
}

impl Packet {
  /// Create a key packet with no timing
  pub fn new(data: Vec<u8>) -> Self {
    Self {
      data,
      pts: 0,
      duration: None,
      key: true,
    }
  }

  /// Create a packet with timing and key flag
  pub fn with_timing(data: Vec<u8>, pts: i64, duration: Option<i64>, key: bool) -> Self {
    Self {
      data,
      pts,
      duration,
      key,
    }
  }

  // ========================================================================
  // Data Access
  // ========================================================================

  pub fn as_slice(&self) -> &[u8] {
    &self.data
  }

  pub fn size(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn into_data(self) -> Vec<u8> {
    self.data
  }

  // ========================================================================
  // Timing and Flags
  // ========================================================================

  /// Presentation timestamp in microseconds
  pub fn pts(&self) -> i64 {
    self.pts
  }

  pub fn set_pts(&mut self, pts: i64) {
    self.pts = pts;
  }

  pub fn duration(&self) -> Option<i64> {
    self.duration
  }

  pub fn set_duration(&mut self, duration: Option<i64>) {
    self.duration = duration;
  }

  pub fn is_key(&self) -> bool {
    self.key
  }

  pub fn set_key(&mut self, key: bool) {
    self.key = key;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_packet_defaults_to_key() {
    let packet = Packet::new(vec![1, 2, 3]);
    assert!(packet.is_key());
    assert_eq!(packet.size(), 3);
    assert_eq!(packet.duration(), None);
  }

  #[test]
  fn test_packet_timing() {
    let mut packet = Packet::with_timing(vec![0; 4], 1000, Some(20), false);
    assert!(!packet.is_key());
    packet.set_pts(-5);
    assert_eq!(packet.pts(), -5);
    assert_eq!(packet.into_data().len(), 4);
  }
}
