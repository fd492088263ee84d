/* Taken from: https://www.m-bus.de/man.html */
pub fn manufacturer_flag(m: u16) -> String {
    let letters = [(m >> 10) & 0x1F, (m >> 5) & 0x1F, m & 0x1F];
    return letters.iter().map(|l| char::from((*l as u8) + 64)).collect();
}

/* Meter ids are printed big endian but travel little endian */
pub fn ident_no(address: &[u8; 4]) -> String {
    return format!("{:02x}{:02x}{:02x}{:02x}", address[3], address[2], address[1], address[0]);
}

/* Inverse of ident_no: "12345678" becomes [0x78, 0x56, 0x34, 0x12] */
pub fn address_from_id(id: &str) -> Option<[u8; 4]> {
    if id.len() != 8 {
        return None;
    }
    let bytes = hex::decode(id).ok()?;
    return Some([bytes[3], bytes[2], bytes[1], bytes[0]]);
}

pub fn get_device_medium(device_type: u8) -> &'static str {
    return match device_type {
        0x02 => "Electricity",
        0x03 => "Gas",
        0x04 => "Heat",
        0x06 => "Water (hot)",
        0x07 => "Water (cold)",
        0x08 => "Heat Cost Allocator",
        0x0A | 0x0B => "Cooling",
        0x0C => "Heat",
        0x0D => "Heat / Cooling Combined",
        _ => "unknown",
    };
}
