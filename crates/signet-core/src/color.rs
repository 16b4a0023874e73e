//! Signer display colors.

use signet_storage::Signer;

/// Fixed palette assigned to co-signers in join order.
pub const PALETTE: [&str; 8] = [
    "#4F46E5", // indigo
    "#059669", // emerald
    "#D97706", // amber
    "#DC2626", // red
    "#7C3AED", // violet
    "#0891B2", // cyan
    "#DB2777", // pink
    "#65A30D", // lime
];

/// Pick a color for the next signer: the first palette entry no sibling is
/// using, wrapping by index once the palette is exhausted.
pub fn pick_color(siblings: &[Signer]) -> String {
    for candidate in PALETTE {
        if !siblings.iter().any(|s| s.color == candidate) {
            return candidate.to_string();
        }
    }
    PALETTE[siblings.len() % PALETTE.len()].to_string()
}
