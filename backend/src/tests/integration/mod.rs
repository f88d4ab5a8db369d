mod api_review;
