mod tests_fragmenter;
