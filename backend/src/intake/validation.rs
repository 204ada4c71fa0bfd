use crate::domain::order::{Customer, LineItem};
use crate::error::AppError;

use super::CreateOrderRequest;
use super::menu::MenuSnapshot;

const PRICE_TOLERANCE: i64 = 1;

/// Checks every precondition in order; the first violation wins and produces a
/// field path.
pub fn validate_and_price(
    req: &CreateOrderRequest,
    menu: &dyn MenuSnapshot,
) -> Result<Vec<LineItem>, AppError> {
    if req.items.is_empty() {
        return Err(AppError::invalid("items", "must be non-empty"));
    }

    let mut priced = Vec::with_capacity(req.items.len());
    for (idx, item) in req.items.iter().enumerate() {
        if item.quantity < 1 {
            return Err(AppError::invalid(
                format!("items[{idx}].quantity"),
                "must be >= 1",
            ));
        }

        let pizza_price = menu.price_of(&item.sku).ok_or_else(|| {
            AppError::invalid(format!("items[{idx}].sku"), "does not resolve in menu")
        })?;

        let mut extras_price = 0i64;
        for (extra_idx, extra_sku) in item.extras.iter().enumerate() {
            let p = menu.price_of(extra_sku).ok_or_else(|| {
                AppError::invalid(
                    format!("items[{idx}].extras[{extra_idx}]"),
                    "does not resolve in menu",
                )
            })?;
            extras_price += p;
        }

        priced.push(LineItem {
            sku: item.sku.clone(),
            quantity: item.quantity,
            unit_price: pizza_price + extras_price,
            extras: item.extras.clone(),
            pizza_price,
            extras_price,
        });
    }

    let computed_total: i64 = priced
        .iter()
        .map(|li| li.unit_price * li.quantity as i64)
        .sum();
    let computed_final = (computed_total - req.discount).max(0);

    if (req.total_price - computed_total).abs() > PRICE_TOLERANCE {
        return Err(AppError::invalid(
            "total_price",
            format!("expected ~{computed_total}, got {}", req.total_price),
        ));
    }
    if (req.final_price - computed_final).abs() > PRICE_TOLERANCE {
        return Err(AppError::invalid(
            "final_price",
            format!("expected ~{computed_final}, got {}", req.final_price),
        ));
    }
    if req.final_price > req.total_price + PRICE_TOLERANCE {
        return Err(AppError::invalid(
            "final_price",
            "must not exceed total_price",
        ));
    }

    if !req.is_pickup
        && req
            .customer
            .delivery_address
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
    {
        return Err(AppError::invalid(
            "customer.delivery_address",
            "required when is_pickup is false",
        ));
    }

    if !is_digit_only_phone(&req.customer.phone) {
        return Err(AppError::invalid(
            "customer.phone",
            "must be digits only, 7-15 characters",
        ));
    }

    Ok(priced)
}

fn is_digit_only_phone(phone: &str) -> bool {
    let len = phone.chars().count();
    (7..=15).contains(&len) && phone.chars().all(|c| c.is_ascii_digit())
}

pub fn build_customer(req: &super::CustomerRequest) -> Customer {
    Customer {
        phone: req.phone.clone(),
        first_name: req.first_name.clone(),
        last_name: req.last_name.clone(),
        delivery_address: req.delivery_address.clone(),
    }
}
