/// DTMF tones injected into an active session
use crate::domain::shared::error::SessionError;
use std::fmt;
use std::time::Duration;

/// DTMF tone representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    Zero,
    One,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Star,
    Pound,
    A,
    B,
    C,
    D,
    /// Two-second pause between tones
    Pause,
}

impl Tone {
    /// Convert to character representation
    pub fn to_char(&self) -> char {
        match self {
            Tone::Zero => '0',
            Tone::One => '1',
            Tone::Two => '2',
            Tone::Three => '3',
            Tone::Four => '4',
            Tone::Five => '5',
            Tone::Six => '6',
            Tone::Seven => '7',
            Tone::Eight => '8',
            Tone::Nine => '9',
            Tone::Star => '*',
            Tone::Pound => '#',
            Tone::A => 'A',
            Tone::B => 'B',
            Tone::C => 'C',
            Tone::D => 'D',
            Tone::Pause => ',',
        }
    }

    /// Parse from character (letters are case-insensitive)
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            '0' => Some(Tone::Zero),
            '1' => Some(Tone::One),
            '2' => Some(Tone::Two),
            '3' => Some(Tone::Three),
            '4' => Some(Tone::Four),
            '5' => Some(Tone::Five),
            '6' => Some(Tone::Six),
            '7' => Some(Tone::Seven),
            '8' => Some(Tone::Eight),
            '9' => Some(Tone::Nine),
            '*' => Some(Tone::Star),
            '#' => Some(Tone::Pound),
            'A' => Some(Tone::A),
            'B' => Some(Tone::B),
            'C' => Some(Tone::C),
            'D' => Some(Tone::D),
            ',' => Some(Tone::Pause),
            _ => None,
        }
    }
}

/// Validated sequence of tones
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneSequence(Vec<Tone>);

impl ToneSequence {
    pub fn parse(tones: &str) -> Result<Self, SessionError> {
        tones
            .chars()
            .map(|c| Tone::from_char(c).ok_or(SessionError::InvalidTone(c)))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn tones(&self) -> &[Tone] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ToneSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|tone| write!(f, "{}", tone.to_char()))
    }
}

/// Per-send DTMF timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfOptions {
    /// How long each tone plays
    pub duration: Duration,
    /// Silence between tones
    pub gap: Duration,
}

impl DtmfOptions {
    pub fn new(duration: Duration, gap: Duration) -> Self {
        Self { duration, gap }
    }
}

impl Default for DtmfOptions {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_millis(70))
    }
}
