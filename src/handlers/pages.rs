use axum::response::Html;

pub async fn dashboard() -> Html<&'static str> {
    Html(include_str!("../../assets/dashboard.html"))
}

pub async fn history() -> Html<&'static str> {
    Html(include_str!("../../assets/history.html"))
}
