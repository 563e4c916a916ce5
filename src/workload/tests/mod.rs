mod tests_workload;
