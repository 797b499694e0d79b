/// Display names for the virtual-key codes a movement profile usually binds.
pub fn vk_to_name(vk: u16) -> Option<&'static str> {
    match vk {
        0x08 => Some("Backspace"),
        0x09 => Some("Tab"),
        0x0D => Some("Enter"),
        0x10 => Some("Shift"),
        0x11 => Some("Ctrl"),
        0x12 => Some("Alt"),
        0x14 => Some("CapsLock"),
        0x1B => Some("Esc"),
        0x20 => Some("Space"),

        0x21 => Some("PageUp"),
        0x22 => Some("PageDown"),
        0x23 => Some("End"),
        0x24 => Some("Home"),
        0x25 => Some("Left"),
        0x26 => Some("Up"),
        0x27 => Some("Right"),
        0x28 => Some("Down"),
        0x2D => Some("Insert"),
        0x2E => Some("Delete"),

        0x30 => Some("0"),
        0x31 => Some("1"),
        0x32 => Some("2"),
        0x33 => Some("3"),
        0x34 => Some("4"),
        0x35 => Some("5"),
        0x36 => Some("6"),
        0x37 => Some("7"),
        0x38 => Some("8"),
        0x39 => Some("9"),

        0x41 => Some("A"),
        0x42 => Some("B"),
        0x43 => Some("C"),
        0x44 => Some("D"),
        0x45 => Some("E"),
        0x46 => Some("F"),
        0x47 => Some("G"),
        0x48 => Some("H"),
        0x49 => Some("I"),
        0x4A => Some("J"),
        0x4B => Some("K"),
        0x4C => Some("L"),
        0x4D => Some("M"),
        0x4E => Some("N"),
        0x4F => Some("O"),
        0x50 => Some("P"),
        0x51 => Some("Q"),
        0x52 => Some("R"),
        0x53 => Some("S"),
        0x54 => Some("T"),
        0x55 => Some("U"),
        0x56 => Some("V"),
        0x57 => Some("W"),
        0x58 => Some("X"),
        0x59 => Some("Y"),
        0x5A => Some("Z"),

        0x60 => Some("Num0"),
        0x61 => Some("Num1"),
        0x62 => Some("Num2"),
        0x63 => Some("Num3"),
        0x64 => Some("Num4"),
        0x65 => Some("Num5"),
        0x66 => Some("Num6"),
        0x67 => Some("Num7"),
        0x68 => Some("Num8"),
        0x69 => Some("Num9"),

        0xA0 => Some("LShift"),
        0xA1 => Some("RShift"),
        0xA2 => Some("LCtrl"),
        0xA3 => Some("RCtrl"),
        0xA4 => Some("LAlt"),
        0xA5 => Some("RAlt"),
        _ => None,
    }
}

/// Reverse lookup of [`vk_to_name`], case-insensitive. Also accepts `0x57`-style hex.
pub fn name_to_vk(name: &str) -> Option<u16> {
    let name = name.trim();
    if let Some(hex) = name
        .strip_prefix("0x")
        .or_else(|| name.strip_prefix("0X"))
    {
        return u16::from_str_radix(hex, 16).ok();
    }
    // The table is small; a linear scan over the byte range is fine here.
    (0..=0xFFu16).find(|&vk| vk_to_name(vk).is_some_and(|n| n.eq_ignore_ascii_case(name)))
}
