use crate::models::CruiseProduct;
use chrono::{DateTime, Datelike, Utc};

/// Shown in place of `{userName}` for anonymous visitors
pub const ANONYMOUS_USER_NAME: &str = "행복♥";

const DESTINATIONS: [(&str, &[&str]); 10] = [
    ("홍콩", &["홍콩"]),
    ("대만", &["대만", "타이완"]),
    ("제주", &["제주"]),
    ("후쿠오카", &["후쿠오카"]),
    ("사세보", &["사세보"]),
    ("도쿄", &["도쿄"]),
    ("나가사키", &["나가사키"]),
    ("오키나와", &["오키나와"]),
    ("싱가포르", &["싱가포르"]),
    ("베트남", &["베트남"]),
];

fn destinations_in(text: &str) -> Vec<&'static str> {
    DESTINATIONS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(name, _)| *name)
        .collect()
}

/// Known destinations named by the package, falling back to the itinerary.
/// Returns `여행지` when neither mentions one.
pub fn extract_destinations(package_name: &str, itinerary_pattern: Option<&str>) -> String {
    let mut found = destinations_in(package_name);
    if found.is_empty() {
        if let Some(pattern) = itinerary_pattern {
            found = destinations_in(pattern);
        }
    }

    if found.is_empty() {
        "여행지".to_string()
    } else {
        found.join(", ")
    }
}

/// 1234000 -> "1,234,000"
pub fn format_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if value < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// Korean short date, `2025. 3. 7.`
pub fn format_korean_date(date: DateTime<Utc>) -> String {
    format!("{}. {}. {}.", date.year(), date.month(), date.day())
}

/// Placeholder values for one render
pub struct RenderContext<'a> {
    pub user_name: &'a str,
    pub product: Option<&'a CruiseProduct>,
}

impl<'a> RenderContext<'a> {
    pub fn render(&self, text: &str) -> String {
        let mut out = text.replace("{userName}", self.user_name);

        if let Some(product) = self.product {
            let destinations =
                extract_destinations(&product.package_name, product.itinerary_pattern.as_deref());
            let price = product
                .base_price
                .map(format_thousands)
                .unwrap_or_else(|| "가격 문의".to_string());
            let start = product
                .start_date
                .map(format_korean_date)
                .unwrap_or_else(|| "일정 문의".to_string());
            let end = product
                .end_date
                .map(format_korean_date)
                .unwrap_or_else(|| "일정 문의".to_string());

            out = out
                .replace("{packageName}", &product.package_name)
                .replace("{cruiseLine}", &product.cruise_line)
                .replace("{shipName}", &product.ship_name)
                .replace("{nights}", &product.nights.to_string())
                .replace("{days}", &product.days.to_string())
                .replace("{basePrice}", &price)
                .replace("{startDate}", &start)
                .replace("{endDate}", &end)
                .replace("{여행지}", &destinations);
        }

        out
    }

    pub fn render_opt(&self, text: Option<&str>) -> Option<String> {
        text.map(|t| self.render(t))
    }
}
