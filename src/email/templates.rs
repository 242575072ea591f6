//! Message bodies for the two emails a buyer can receive.

use chrono::{Datelike, Utc};

use super::{LicenseEmail, OutOfStockEmail};

/// Rendered message content.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn order_url(shop_domain: Option<&str>, order_number: &str) -> Option<String> {
    shop_domain.map(|domain| format!("https://{}/account/orders/{}", domain, order_number))
}

fn wrap_html(title: &str, inner: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 520px; margin: 0 auto; padding: 32px 24px; color: #1a1a1a;">
<h2 style="font-weight: 600; color: #000;">{}</h2>
{}
<hr style="border: none; border-top: 1px solid #eee; margin: 40px 0 24px;">
<p style="color: #999; font-size: 12px;">&copy; {}. All rights reserved.</p>
</body>
</html>"#,
        title,
        inner,
        Utc::now().year()
    )
}

pub fn render_license(email: &LicenseEmail, shop_domain: Option<&str>) -> Rendered {
    let plural = email.keys.len() > 1;
    let subject = if plural {
        format!("Your License Keys - Order #{}", email.order_number)
    } else {
        format!("Your License Key - Order #{}", email.order_number)
    };
    let title = if plural {
        "Here are your license keys"
    } else {
        "Here's your license key"
    };
    let url = order_url(shop_domain, &email.order_number);

    let mut text = format!(
        "{}\n\nOrder #{} - {}\n\n",
        title, email.order_number, email.product_name
    );
    for key in &email.keys {
        text.push_str(key);
        text.push('\n');
    }
    text.push_str("\nKeep your key safe, you'll need it for activation.\n");
    if let Some(url) = &url {
        text.push_str(&format!("\nView order details: {}\n", url));
    }

    let mut inner = format!(
        r#"<p style="font-size: 14px; color: #666;">Order #{} &bull; {}</p>
"#,
        escape_html(&email.order_number),
        escape_html(&email.product_name)
    );
    for key in &email.keys {
        inner.push_str(&format!(
            r#"<div style="background: #f8f9fa; border: 1px solid #e9ecef; border-radius: 8px; padding: 16px 24px; margin: 12px 0; text-align: center;">
<code style="font-size: 15px; letter-spacing: 0.5px; color: #000;">{}</code>
</div>
"#,
            escape_html(key)
        ));
    }
    inner.push_str(
        r#"<p style="font-size: 13px; color: #666;">Keep your key safe, you'll need it for activation.</p>
"#,
    );
    if let Some(url) = &url {
        inner.push_str(&format!(
            r#"<p style="text-align: center; margin: 24px 0;"><a href="{}" style="display: inline-block; padding: 10px 20px; background: #000; color: #fff; text-decoration: none; border-radius: 6px;">View order details</a></p>
"#,
            escape_html(url)
        ));
    }

    Rendered {
        subject,
        text,
        html: wrap_html(title, &inner),
    }
}

pub fn render_out_of_stock(email: &OutOfStockEmail, shop_domain: Option<&str>) -> Rendered {
    let subject = format!("License Delivery Delayed - Order #{}", email.order_number);
    let title = "Your license key is on its way";
    let url = order_url(shop_domain, &email.order_number);

    let mut text = format!(
        "{}\n\nOrder #{} - {}\n\nThank you for your purchase. We're temporarily out of {} license keys, \
so your key couldn't be delivered right away. We'll email it to you as soon as new keys are in stock. \
There's nothing you need to do.\n",
        title, email.order_number, email.product_name, email.category
    );
    if let Some(url) = &url {
        text.push_str(&format!("\nView order details: {}\n", url));
    }

    let mut inner = format!(
        r#"<p style="font-size: 14px; color: #666;">Order #{} &bull; {}</p>
<p>Thank you for your purchase. We're temporarily out of <strong>{}</strong> license keys, so your key couldn't be delivered right away.</p>
<p>We'll email it to you as soon as new keys are in stock. There's nothing you need to do.</p>
"#,
        escape_html(&email.order_number),
        escape_html(&email.product_name),
        escape_html(&email.category)
    );
    if let Some(url) = &url {
        inner.push_str(&format!(
            r#"<p><a href="{}">View order details</a></p>
"#,
            escape_html(url)
        ));
    }

    Rendered {
        subject,
        text,
        html: wrap_html(title, &inner),
    }
}
