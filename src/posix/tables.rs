//! Rate → speed constant tables for platforms whose constants are not
//! exposed symbolically by every libc.

/// Linux `Bxxx` values (octal, as in `<asm-generic/termbits.h>`).
pub const LINUX_RATES: &[(u32, u32)] = &[
    (50, 0o000001),
    (75, 0o000002),
    (110, 0o000003),
    (134, 0o000004),
    (150, 0o000005),
    (200, 0o000006),
    (300, 0o000007),
    (600, 0o000010),
    (1200, 0o000011),
    (1800, 0o000012),
    (2400, 0o000013),
    (4800, 0o000014),
    (9600, 0o000015),
    (19200, 0o000016),
    (38400, 0o000017),
    (57600, 0o010001),
    (115200, 0o010002),
    (230400, 0o010003),
    (460800, 0o010004),
    (500000, 0o010005),
    (576000, 0o010006),
    (921600, 0o010007),
    (1000000, 0o010010),
    (1152000, 0o010011),
    (1500000, 0o010012),
    (2000000, 0o010013),
    (2500000, 0o010014),
    (3000000, 0o010015),
    (3500000, 0o010016),
    (4000000, 0o010017),
];

/// Cygwin extended rates.
pub const CYGWIN_RATES: &[(u32, u32)] = &[
    (128000, 0x01003),
    (256000, 0x01005),
    (500000, 0x01007),
    (576000, 0x01008),
    (921600, 0x01009),
    (1000000, 0x0100A),
    (1152000, 0x0100B),
    (1500000, 0x0100C),
    (2000000, 0x0100D),
    (2500000, 0x0100E),
    (3000000, 0x0100F),
];

/// Rates every POSIX libc spells as a `Bxxx` constant, plus the Linux
/// extensions on Linux hosts. Used for reverse lookups.
pub const CANDIDATE_RATES: &[u32] = &[
    50, 75, 110, 134, 150, 200, 300, 600, 1200, 1800, 2400, 4800, 9600, 19200, 38400, 57600,
    115200, 230400, 460800, 500000, 576000, 921600, 1000000, 1152000, 1500000, 2000000, 2500000,
    3000000, 3500000, 4000000,
];
