use axum::{debug_handler, extract::{Path, State}, routing::get, Json, Router};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/restaurants", get(all_restaurants))
        .route("/restaurants/{id}", get(restaurant_by_id))
        .route("/kitchens", get(all_kitchens))
        .route("/kitchens/used", get(used_kitchens))
}

type RestaurantRow = (i64, String, Option<String>, Option<String>, Option<String>, Option<String>);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Restaurant {
    id: i64,
    name: String,
    logourl: Option<String>,
    city: Option<String>,
    street: Option<String>,
    subkitchens: Vec<String>,
}

fn restaurant_row((id, name, logourl, city, street, subkitchens): RestaurantRow) -> Restaurant {
    Restaurant {
        id,
        name,
        logourl,
        city,
        street,
        subkitchens: split_concat(subkitchens),
    }
}

fn split_concat(concat: Option<String>) -> Vec<String> {
    concat
        .map(|s| s.split(',').map(str::to_owned).collect())
        .unwrap_or_default()
}

#[debug_handler]
async fn all_restaurants(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Restaurant>>> {
    let rows: Vec<RestaurantRow> = sqlx::query_as(
        "SELECT r.id, r.name, r.logourl, r.city, r.street, group_concat(sk.description) \
         FROM restaurants r \
         JOIN restaurants_subkitchens rs ON r.id = rs.restaurant_id \
         JOIN subkitchens sk ON sk.id = rs.subkitchen_id \
         GROUP BY r.id, r.name, r.logourl, r.city, r.street",
    )
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(rows.into_iter().map(restaurant_row).collect()))
}

#[debug_handler]
async fn restaurant_by_id(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<i64>,
) -> AppResult<Json<Restaurant>> {
    let row: Option<RestaurantRow> = sqlx::query_as(
        "SELECT r.id, r.name, r.logourl, r.city, r.street, group_concat(sk.description) \
         FROM restaurants r \
         LEFT JOIN restaurants_subkitchens rs ON r.id = rs.restaurant_id \
         LEFT JOIN subkitchens sk ON sk.id = rs.subkitchen_id \
         WHERE r.id = ? \
         GROUP BY r.id, r.name, r.logourl, r.city, r.street",
    )
    .bind(id)
    .fetch_optional(&db_pool)
    .await?;

    match row {
        Some(row) => Ok(Json(restaurant_row(row))),
        None => Err(AppError::NotFound("restaurant")),
    }
}

#[derive(Serialize)]
struct Kitchen {
    description: String,
    subkitchens: Vec<String>,
}

#[debug_handler]
async fn all_kitchens(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Kitchen>>> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT k.description, group_concat(sk.description) \
         FROM subkitchens sk \
         JOIN kitchens k ON k.id = sk.kitchen_id \
         GROUP BY k.description",
    )
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(kitchen_rows(rows)))
}

/// Like `all_kitchens`, restricted to kitchens some restaurant actually serves.
#[debug_handler]
async fn used_kitchens(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Kitchen>>> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT k.description, group_concat(sk.description) \
         FROM subkitchens sk \
         JOIN kitchens k ON k.id = sk.kitchen_id \
         WHERE sk.id IN (SELECT rs.subkitchen_id FROM restaurants_subkitchens rs) \
         GROUP BY k.description",
    )
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(kitchen_rows(rows)))
}

fn kitchen_rows(rows: Vec<(String, Option<String>)>) -> Vec<Kitchen> {
    rows.into_iter()
        .map(|(description, subkitchens)| Kitchen {
            description,
            subkitchens: split_concat(subkitchens),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    async fn seed(pool: &SqlitePool) {
        sqlx::raw_sql(
            "INSERT INTO kitchens (id,description) VALUES (1,'Italian');
             INSERT INTO subkitchens (id,kitchen_id,description) VALUES (1,1,'Pizza'),(2,1,'Pasta');
             INSERT INTO restaurants (id,name,logourl,city,street) VALUES (7,'Da Mario',NULL,'Vienna','Hauptstr. 1');
             INSERT INTO restaurants_subkitchens (restaurant_id,subkitchen_id) VALUES (7,1),(7,2);",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn lists_restaurants_with_their_subkitchens() {
        let pool = test_pool().await;
        seed(&pool).await;

        let Json(restaurants) = all_restaurants(State(pool)).await.unwrap();
        assert_eq!(restaurants.len(), 1);
        assert_eq!(restaurants[0].name, "Da Mario");
        assert_eq!(restaurants[0].subkitchens, vec!["Pizza", "Pasta"]);
    }

    #[tokio::test]
    async fn unknown_restaurant_is_not_found() {
        let pool = test_pool().await;

        let result = restaurant_by_id(State(pool), Path(404)).await;
        assert!(matches!(result, Err(AppError::NotFound("restaurant"))));
    }
}
