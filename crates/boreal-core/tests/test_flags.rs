use boreal_core::flags::{self, Flags};
use boreal_core::integration::Integration;

#[test]
fn test_flag_unflag_roundtrip() {
    let mut f = Flags::default();
    assert!(f.is_clear());

    f.flag(flags::channel::NOISY);
    f.flag(flags::channel::GAIN);
    assert!(f.is_flagged(flags::channel::NOISY));
    assert!(f.is_flagged(flags::channel::SOFTWARE));
    assert!(f.is_unflagged(flags::channel::HARDWARE));

    f.unflag(flags::channel::NOISY);
    assert!(f.is_unflagged(flags::channel::NOISY));
    assert!(f.is_flagged(flags::channel::GAIN));

    f.unflag(flags::channel::SOFTWARE);
    assert!(f.is_clear());
}

#[test]
fn test_is_flagged_is_any_bit() {
    let mut f = Flags::default();
    f.flag(flags::frame::SPIKY);
    // MODELING is a multi-bit pattern; any member bit matches.
    assert!(f.is_flagged(flags::frame::MODELING));
    assert!(f.is_unflagged(flags::frame::JUMP));
}

#[test]
fn test_slim_discards_and_reindexes() {
    let mut integration = Integration::new(0, 0, 4, 8);
    integration.channels[1].flags.flag(flags::channel::DEAD);
    integration.channels[3].flags.flag(flags::channel::NOISY);

    let discarded = integration.slim(flags::channel::HARDWARE);
    assert_eq!(discarded, 1);
    assert_eq!(integration.channels.len(), 3);

    // Fixed indices survive; working indices are rewritten.
    let fixed: Vec<usize> = integration.channels.iter().map(|ch| ch.fixed_index).collect();
    assert_eq!(fixed, vec![0, 2, 3]);
    let working: Vec<usize> = integration.channels.iter().map(|ch| ch.index).collect();
    assert_eq!(working, vec![0, 1, 2]);

    // Frames keep full layout width.
    let frame = integration.frames[0].as_ref().unwrap();
    assert_eq!(frame.data.len(), 4);

    let lookup = integration.channel_lookup();
    assert_eq!(lookup, vec![Some(0), None, Some(1), Some(2)]);
}

#[test]
fn test_valid_channel_count_ignores_flagged() {
    let mut integration = Integration::new(0, 0, 3, 4);
    assert_eq!(integration.valid_channel_count(), 3);
    integration.channels[0].flags.flag(flags::channel::SPIKY);
    assert_eq!(integration.valid_channel_count(), 2);
}
