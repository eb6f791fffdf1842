mod tests_span_cache;
