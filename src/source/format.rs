const GIB: f64 = 1_073_741_824.0;
const MIB: f64 = 1_048_576.0;
const KIB: f64 = 1024.0;

pub fn one_decimal(value: f64) -> String {
    format!("{value:.1}")
}

pub fn percent(value: f64) -> String {
    format!("{value:.1}%")
}

pub fn millis(value: f64) -> String {
    format!("{value:.1}ms")
}

pub fn two_decimals(value: f64) -> String {
    format!("{value:.2}")
}

/// Bytes per second scaled to the largest binary unit that fits.
pub fn rate(value: f64) -> String {
    if value >= GIB {
        format!("{:.1} GB/s", value / GIB)
    } else if value >= MIB {
        format!("{:.1} MB/s", value / MIB)
    } else if value >= KIB {
        format!("{:.1} KB/s", value / KIB)
    } else {
        format!("{value:.1} B/s")
    }
}

/// `in/out` pair of rates.
pub fn rate_pair(inbound: f64, outbound: f64) -> String {
    format!("{}/{}", rate(inbound), rate(outbound))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_thresholds() {
        assert_eq!(rate(0.0), "0.0 B/s");
        assert_eq!(rate(1023.0), "1023.0 B/s");
        assert_eq!(rate(1024.0), "1.0 KB/s");
        assert_eq!(rate(1536.0), "1.5 KB/s");
        assert_eq!(rate(MIB * 2.5), "2.5 MB/s");
        assert_eq!(rate(GIB), "1.0 GB/s");
    }

    #[test]
    fn unit_suffixes() {
        assert_eq!(percent(42.26), "42.3%");
        assert_eq!(millis(12.34), "12.3ms");
        assert_eq!(one_decimal(0.5), "0.5");
        assert_eq!(two_decimals(9.3), "9.30");
        assert_eq!(rate_pair(2048.0, 10.0), "2.0 KB/s/10.0 B/s");
    }
}
