//! Spacegroup symbols, numbers and XDS Bravais lattice codes.

/// CCP4 short symbols (spaces removed) for the chiral spacegroups pointless
/// and aimless can report.
const CCP4_SYMBOLS: &[(&str, u32)] = &[
    ("P1", 1),
    ("P2", 3),
    ("P21", 4),
    ("C2", 5),
    ("P222", 16),
    ("P2221", 17),
    ("P21212", 18),
    ("P212121", 19),
    ("C2221", 20),
    ("C222", 21),
    ("F222", 22),
    ("I222", 23),
    ("I212121", 24),
    ("P4", 75),
    ("P41", 76),
    ("P42", 77),
    ("P43", 78),
    ("I4", 79),
    ("I41", 80),
    ("P422", 89),
    ("P4212", 90),
    ("P4122", 91),
    ("P41212", 92),
    ("P4222", 93),
    ("P42212", 94),
    ("P4322", 95),
    ("P43212", 96),
    ("I422", 97),
    ("I4122", 98),
    ("P3", 143),
    ("P31", 144),
    ("P32", 145),
    ("R3", 146),
    ("H3", 146),
    ("P312", 149),
    ("P321", 150),
    ("P3112", 151),
    ("P3121", 152),
    ("P3212", 153),
    ("P3221", 154),
    ("R32", 155),
    ("H32", 155),
    ("P6", 168),
    ("P61", 169),
    ("P65", 170),
    ("P62", 171),
    ("P64", 172),
    ("P63", 173),
    ("P622", 177),
    ("P6122", 178),
    ("P6522", 179),
    ("P6222", 180),
    ("P6422", 181),
    ("P6322", 182),
    ("P23", 195),
    ("F23", 196),
    ("I23", 197),
    ("P213", 198),
    ("I213", 199),
    ("P432", 207),
    ("P4232", 208),
    ("F432", 209),
    ("F4132", 210),
    ("I432", 211),
    ("P4332", 212),
    ("P4132", 213),
    ("I4132", 214),
];

/// Spacegroup number for a CCP4 symbol such as `P 21 21 21` or `P212121`.
pub fn number_for_symbol(symbol: &str) -> Option<u32> {
    let compact: String = symbol
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_ascii_uppercase();
    CCP4_SYMBOLS
        .iter()
        .find(|(name, _)| *name == compact)
        .map(|(_, number)| *number)
}

/// Compact CCP4 symbol for a chiral spacegroup number.
pub fn symbol_for_number(number: u32) -> Option<&'static str> {
    CCP4_SYMBOLS
        .iter()
        .find(|(_, candidate)| *candidate == number)
        .map(|(name, _)| *name)
}

/// XDS Bravais lattice code (as printed in `IDXREF.LP`) for a spacegroup.
pub fn bravais_for(number: u32) -> Option<&'static str> {
    let code = match number {
        1..=2 => "aP",
        3 | 4 | 6 | 7 | 10 | 11 | 13 | 14 => "mP",
        5 | 8 | 9 | 12 | 15 => "mC",
        16..=19 | 25..=34 | 47..=62 => "oP",
        20 | 21 | 35..=41 | 63..=68 => "oC",
        22 | 42 | 43 | 69 | 70 => "oF",
        23 | 24 | 44..=46 | 71..=74 => "oI",
        75..=78 | 81 | 83..=86 | 89..=96 | 99..=106 | 111..=118 | 123..=138 => "tP",
        79 | 80 | 82 | 87 | 88 | 97 | 98 | 107..=110 | 119..=122 | 139..=142 => "tI",
        146 | 148 | 155 | 160 | 161 | 166 | 167 => "hR",
        143..=145 | 147 | 149..=154 | 156..=159 | 162..=165 | 168..=194 => "hP",
        195 | 198 | 200 | 201 | 205 | 207 | 208 | 212 | 213 | 215 | 218 | 221..=224 => "cP",
        196 | 202 | 203 | 209 | 210 | 216 | 219 | 225..=228 => "cF",
        197 | 199 | 204 | 206 | 211 | 214 | 217 | 220 | 229 | 230 => "cI",
        _ => return None,
    };
    Some(code)
}
