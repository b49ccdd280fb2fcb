//! 卡密消息渲染
//!
//! 消息在入队时渲染并随投递记录持久化，worker 原样发送，
//! 保证重试时用户看到的内容一致。

/// 渲染礼品卡到账消息
pub fn render_gift_card_message(
    brand_name: &str,
    code: &str,
    value_cents: i64,
    currency: &str,
) -> String {
    format!(
        "您的 {} 礼品卡已到账，面额 {}。卡密：{}。请妥善保管，勿转发他人。",
        brand_name,
        format_amount(value_cents, currency),
        code
    )
}

/// 金额格式化（分 -> 带币种符号的金额）
pub fn format_amount(value_cents: i64, currency: &str) -> String {
    let whole = value_cents / 100;
    let frac = (value_cents % 100).abs();
    match currency {
        "USD" => format!("${}.{:02}", whole, frac),
        "EUR" => format!("€{}.{:02}", whole, frac),
        "CNY" => format!("¥{}.{:02}", whole, frac),
        other => format!("{} {}.{:02}", other, whole, frac),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount_known_currencies() {
        assert_eq!(format_amount(2500, "USD"), "$25.00");
        assert_eq!(format_amount(1000, "EUR"), "€10.00");
        assert_eq!(format_amount(9900, "CNY"), "¥99.00");
    }

    #[test]
    fn test_format_amount_unknown_currency() {
        assert_eq!(format_amount(2500, "GBP"), "GBP 25.00");
    }

    #[test]
    fn test_format_amount_non_integral() {
        assert_eq!(format_amount(2550, "USD"), "$25.50");
        assert_eq!(format_amount(105, "USD"), "$1.05");
    }

    #[test]
    fn test_render_contains_code_and_amount() {
        let msg = render_gift_card_message("Starbucks", "GC-XYZ-001", 2500, "USD");
        assert!(msg.contains("Starbucks"));
        assert!(msg.contains("GC-XYZ-001"));
        assert!(msg.contains("$25.00"));
    }
}
