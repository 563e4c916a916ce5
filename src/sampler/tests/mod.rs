mod tests_rectangle;
